mod applicant;
mod money;
mod policy;
mod pricing;
mod route;
mod ticket;
mod transaction;
mod voucher;

pub use applicant::*;
pub use money::*;
pub use policy::*;
pub use pricing::*;
pub use route::*;
pub use ticket::*;
pub use transaction::*;
pub use voucher::*;
