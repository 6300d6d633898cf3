pub mod receipts;
pub mod storage;
