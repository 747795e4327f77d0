mod accrual;
mod float;
mod ledger;
mod money;
mod projection;

pub use accrual::*;
pub use float::*;
pub use ledger::*;
pub use money::*;
pub use projection::*;
