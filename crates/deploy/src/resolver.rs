//! Tag selection and dependency ordering of deployment declarations.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    Error, Result,
    deployment::{ALL_TAG, DeploymentRequest},
};

/// Select the requests matching `selected_tags` and order them so that every
/// `ref` dependency is deployed before its dependents.
///
/// A request is selected when its tags intersect `selected_tags`, or when
/// [`ALL_TAG`] is selected. Dependencies of selected requests are pulled in even
/// if their own tags were not selected. Independent requests keep their
/// declaration order, so the output is deterministic.
///
/// # Errors
/// - [`Error::DuplicateDeployment`] if two requests share a name.
/// - [`Error::UnknownArtifact`] if a selected request references an undeclared name.
/// - [`Error::CyclicDependency`] with the names on the cycle.
pub fn resolve<I, S>(selected_tags: I, requests: &[DeploymentRequest]) -> Result<Vec<DeploymentRequest>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let selected_tags: BTreeSet<String> = selected_tags
        .into_iter()
        .map(|tag| tag.as_ref().to_string())
        .collect();
    let select_all = selected_tags.contains(ALL_TAG);

    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for (i, request) in requests.iter().enumerate() {
        if index.insert(request.name.as_str(), i).is_some() {
            return Err(Error::DuplicateDeployment(request.name.clone()));
        }
    }

    // Dependency edges, deduplicated: deps[i] are the indices i needs first.
    let mut deps: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); requests.len()];

    let mut selected = vec![false; requests.len()];
    let mut pending: Vec<usize> = requests
        .iter()
        .enumerate()
        .filter(|(_, r)| select_all || !r.tags.is_disjoint(&selected_tags))
        .map(|(i, _)| i)
        .collect();

    while let Some(i) = pending.pop() {
        if selected[i] {
            continue;
        }
        selected[i] = true;

        for dependency in requests[i].dependencies() {
            let Some(&j) = index.get(dependency) else {
                return Err(Error::UnknownArtifact(dependency.to_string()));
            };
            deps[i].insert(j);
            if !selected[j] {
                tracing::debug!(
                    name = %requests[i].name,
                    dependency,
                    "Including dependency of selected deployment"
                );
                pending.push(j);
            }
        }
    }

    // Kahn's algorithm, always taking the earliest declared ready request.
    let mut in_degree = vec![0usize; requests.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); requests.len()];
    for i in (0..requests.len()).filter(|i| selected[*i]) {
        in_degree[i] = deps[i].len();
        for &j in &deps[i] {
            dependents[j].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..requests.len())
        .filter(|i| selected[*i] && in_degree[*i] == 0)
        .collect();
    let mut order = Vec::new();

    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &k in &dependents[i] {
            in_degree[k] -= 1;
            if in_degree[k] == 0 {
                ready.insert(k);
            }
        }
    }

    let selected_count = selected.iter().filter(|s| **s).count();
    if order.len() < selected_count {
        let remaining: BTreeSet<usize> = (0..requests.len())
            .filter(|i| selected[*i] && in_degree[*i] > 0)
            .collect();
        let cycle = find_cycle(&remaining, &deps)
            .into_iter()
            .map(|i| requests[i].name.clone())
            .collect();
        return Err(Error::CyclicDependency(cycle));
    }

    Ok(order.into_iter().map(|i| requests[i].clone()).collect())
}

/// Walk dependency edges inside `remaining` until a node repeats.
///
/// Every node left over by Kahn's algorithm still has an unresolved dependency
/// inside `remaining`, so the walk always closes a cycle.
fn find_cycle(remaining: &BTreeSet<usize>, deps: &[BTreeSet<usize>]) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: BTreeMap<usize, usize> = BTreeMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let Some(&next) = deps[current].iter().find(|d| remaining.contains(d)) else {
            return path;
        };
        if let Some(&pos) = position.get(&next) {
            let mut cycle = path.split_off(pos);
            cycle.push(next);
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}
