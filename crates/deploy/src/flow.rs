//! Superfluid money-stream operations.
//!
//! A flow is a continuous per-second transfer of a super token from a sender to
//! a receiver, managed by the constant flow agreement (CFA). Operations are sent
//! to the Superfluid host through `callAgreement`, which forwards the inner CFA
//! call with the sender's context.

use alloy_core::{
    primitives::{Address, Bytes, aliases::I96},
    sol,
    sol_types::SolCall,
};

use crate::{Error, Result, config::SuperfluidConfig, submitter::TransactionIntent};

/// Largest flow rate representable in the CFA's `int96` rate field.
pub const MAX_FLOW_RATE: i128 = (1 << 95) - 1;

sol! {
    interface ISuperfluid {
        function callAgreement(address agreementClass, bytes callData, bytes userData)
            external
            returns (bytes returnedData);
    }

    interface IConstantFlowAgreementV1 {
        function createFlow(address token, address receiver, int96 flowRate, bytes ctx)
            external
            returns (bytes newCtx);
        function updateFlow(address token, address receiver, int96 flowRate, bytes ctx)
            external
            returns (bytes newCtx);
        function deleteFlow(address token, address sender, address receiver, bytes ctx)
            external
            returns (bytes newCtx);
    }
}

/// The flow operation to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum FlowKind {
    Create,
    Update,
    Delete,
}

/// A requested flow operation, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowOperationSpec {
    pub kind: FlowKind,
    pub sender: Address,
    /// Receiver as given by the operator. Validated by [`FlowOperationBuilder::build`].
    pub receiver: String,
    pub token: Address,
    /// Wei per second. Ignored for [`FlowKind::Delete`].
    pub flow_rate: i128,
    /// When set, `token` must be this super token.
    pub expected_super_token: Option<Address>,
}

/// Validates flow operations and encodes them for a network's Superfluid deployment.
#[derive(Debug, Clone, Copy)]
pub struct FlowOperationBuilder<'a> {
    network: &'a str,
    superfluid: &'a SuperfluidConfig,
}

impl<'a> FlowOperationBuilder<'a> {
    pub fn new(network: &'a str, superfluid: &'a SuperfluidConfig) -> Self {
        Self {
            network,
            superfluid,
        }
    }

    /// Resolve a token given as a configured symbol (`fDAIx`) or as the address
    /// of a configured super token.
    pub fn resolve_token(&self, identifier: &str) -> Result<Address> {
        let identifier = identifier.trim();
        if let Some(address) = self.superfluid.super_tokens.get(identifier) {
            return Ok(*address);
        }

        match identifier.parse::<Address>() {
            Ok(address) if self.is_super_token(address) => Ok(address),
            _ => Err(self.unknown_token(identifier)),
        }
    }

    fn is_super_token(&self, address: Address) -> bool {
        self.superfluid.super_tokens.values().any(|known| *known == address)
    }

    fn unknown_token(&self, token: impl ToString) -> Error {
        Error::UnknownSuperToken {
            token: token.to_string(),
            network: self.network.to_string(),
        }
    }

    /// Check the token and, for create and update, the flow rate.
    ///
    /// Needs no sender, so callers can run it before loading a signing key.
    pub fn check_token_and_rate(
        &self,
        kind: FlowKind,
        token: Address,
        expected_super_token: Option<Address>,
        flow_rate: i128,
    ) -> Result<()> {
        if !self.is_super_token(token) {
            return Err(self.unknown_token(token));
        }
        if expected_super_token.is_some_and(|expected| expected != token) {
            return Err(self.unknown_token(token));
        }

        if kind != FlowKind::Delete && !(0..=MAX_FLOW_RATE).contains(&flow_rate) {
            return Err(Error::InvalidFlowRate { rate: flow_rate });
        }

        Ok(())
    }

    /// Parse a receiver address, refusing the zero address.
    ///
    /// The sender-dependent check happens in [`Self::build`].
    pub fn parse_receiver(&self, receiver: &str) -> Result<Address> {
        let invalid = |reason: &str| Error::InvalidReceiver {
            receiver: receiver.to_string(),
            reason: reason.to_string(),
        };

        let address: Address = receiver
            .trim()
            .parse()
            .map_err(|_| invalid("not a valid address"))?;
        if address.is_zero() {
            return Err(invalid("the zero address cannot receive a flow"));
        }

        Ok(address)
    }

    /// Validate `operation` and encode it as a call to the Superfluid host.
    ///
    /// Checks run in a fixed order, and the first failure is returned: the token,
    /// then the flow rate (create and update only), then the receiver. No network
    /// call is made.
    pub fn build(&self, operation: &FlowOperationSpec) -> Result<TransactionIntent> {
        self.check_token_and_rate(
            operation.kind,
            operation.token,
            operation.expected_super_token,
            operation.flow_rate,
        )?;

        let receiver = self.parse_receiver(&operation.receiver)?;
        if receiver == operation.sender {
            return Err(Error::InvalidReceiver {
                receiver: operation.receiver.clone(),
                reason: "a flow cannot be opened to the sender itself".to_string(),
            });
        }

        let token = operation.token;
        let ctx = Bytes::new();
        let call_data = match operation.kind {
            FlowKind::Create => IConstantFlowAgreementV1::createFlowCall {
                token,
                receiver,
                flowRate: self.encode_rate(operation.flow_rate)?,
                ctx,
            }
            .abi_encode(),
            FlowKind::Update => IConstantFlowAgreementV1::updateFlowCall {
                token,
                receiver,
                flowRate: self.encode_rate(operation.flow_rate)?,
                ctx,
            }
            .abi_encode(),
            FlowKind::Delete => IConstantFlowAgreementV1::deleteFlowCall {
                token,
                sender: operation.sender,
                receiver,
                ctx,
            }
            .abi_encode(),
        };

        let data = ISuperfluid::callAgreementCall {
            agreementClass: self.superfluid.cfa,
            callData: call_data.into(),
            userData: Bytes::new(),
        }
        .abi_encode();

        tracing::debug!(
            kind = %operation.kind,
            sender = %operation.sender,
            %receiver,
            token = %operation.token,
            flow_rate = operation.flow_rate,
            network = self.network,
            "Flow operation built"
        );

        Ok(TransactionIntent::call(operation.sender, self.superfluid.host, data))
    }

    fn encode_rate(&self, rate: i128) -> Result<I96> {
        I96::try_from(rate).map_err(|_| Error::InvalidFlowRate { rate })
    }
}
