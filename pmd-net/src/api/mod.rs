mod error;
pub mod rte;

pub use error::{Errno, Result, check_rte_success, check_success, errno_from, rte_errno};
