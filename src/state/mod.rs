pub mod ledger;

pub use ledger::{create_memory_ledger, JsonFileLedger, SharedLedger, VerifiedUser};
