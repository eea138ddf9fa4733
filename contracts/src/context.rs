//! Protocol-wide collaborators shared by every vault.

use std::sync::Arc;

use folio_protocol::oracle::PriceOracle;
use folio_protocol::solver::{SolverHandler, SolverRegistry};

use crate::error::VaultError;
use crate::fees::ProtocolFeeConfig;
use crate::position::AssetRegistry;

/// Read-mostly services a vault operation runs against.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// USD price source.
    pub oracle: Arc<dyn PriceOracle>,
    /// Enabled swap handlers.
    pub solvers: SolverRegistry,
    /// Basket token adapters.
    pub assets: AssetRegistry,
    /// Protocol fee cut.
    pub protocol_fees: ProtocolFeeConfig,
}

impl ExecutionContext {
    /// Context with an oracle and nothing else registered.
    pub fn new(oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            oracle,
            solvers: SolverRegistry::new(),
            assets: AssetRegistry::new(),
            protocol_fees: ProtocolFeeConfig::default(),
        }
    }

    /// Enables a solver handler.
    pub fn with_solver(mut self, handler: Arc<dyn SolverHandler>) -> Self {
        self.solvers.register(handler);
        self
    }

    /// Sets the protocol fee cut after validating it.
    pub fn with_protocol_fees(mut self, fees: ProtocolFeeConfig) -> Result<Self, VaultError> {
        fees.validate()?;
        self.protocol_fees = fees;
        Ok(self)
    }

    /// Borrowed oracle handle.
    pub fn oracle(&self) -> &dyn PriceOracle {
        self.oracle.as_ref()
    }
}
