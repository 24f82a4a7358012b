use serde::{Deserialize, Serialize};

use crate::worker::RunArgs;

pub type OperationId = u32;

/// Procedimiento remoto que ejecuta una operación de map.
pub const MAP_PROCEDURE: &str = "map";
/// Procedimiento remoto que ejecuta una operación de reduce.
pub const REDUCE_PROCEDURE: &str = "reduce";

/// Unidad despachable: una invocación de map o de reduce.
///
/// `id` se asigna en orden de despacho dentro de la fase (empezando en 0) y
/// es la identidad que viaja en los `RunArgs`. Un reintento conserva `id`
/// y sólo incrementa `attempt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Nombre de la fase, que es también el procedimiento remoto a invocar.
    pub procedure: String,
    pub id: OperationId,
    pub input_locator: String,
    pub attempt: u32,
}

impl Operation {
    pub fn new(procedure: impl Into<String>, id: OperationId, input_locator: impl Into<String>) -> Self {
        Self {
            procedure: procedure.into(),
            id,
            input_locator: input_locator.into(),
            attempt: 0,
        }
    }

    /// Misma operación, siguiente intento.
    pub fn retry(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self
        }
    }

    pub fn run_args(&self) -> RunArgs {
        RunArgs {
            operation_id: self.id,
            input_locator: self.input_locator.clone(),
        }
    }
}
