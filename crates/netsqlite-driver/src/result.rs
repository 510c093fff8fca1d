use netsqlite_types::rpc::ExecResponse;
use netsqlite_types::UNSUPPORTED_SENTINEL;

use crate::capability::Capability;
use crate::error::DriverError;

/// Outcome of [`execute`](crate::SqlConnection::execute).
///
/// The server reports `-1` for values the engine could not provide; the
/// accessors turn that into an error so it cannot be mistaken for zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    rows_affected: i64,
    last_insert_id: i64,
}

impl ExecResult {
    pub fn new(rows_affected: i64, last_insert_id: i64) -> Self {
        Self {
            rows_affected,
            last_insert_id,
        }
    }

    pub fn rows_affected(&self) -> Result<i64, DriverError> {
        reported(self.rows_affected, Capability::RowsAffected)
    }

    pub fn last_insert_id(&self) -> Result<i64, DriverError> {
        reported(self.last_insert_id, Capability::LastInsertId)
    }
}

fn reported(value: i64, capability: Capability) -> Result<i64, DriverError> {
    if value == UNSUPPORTED_SENTINEL {
        Err(DriverError::Unsupported(capability))
    } else {
        Ok(value)
    }
}

impl From<ExecResponse> for ExecResult {
    fn from(resp: ExecResponse) -> Self {
        Self::new(resp.rows_affected, resp.last_insert_id)
    }
}
