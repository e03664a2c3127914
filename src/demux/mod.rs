pub mod barcode_table;
pub mod layout;
pub mod matcher;
pub mod output;
pub mod pipeline;
pub mod writer;
