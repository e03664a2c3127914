pub mod disk_sort;
pub mod dup_index;
pub mod grouper;
pub mod markdup;
pub mod read_end;
pub mod umi;
