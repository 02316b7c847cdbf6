pub mod coinbase_intx;
pub mod okx;
