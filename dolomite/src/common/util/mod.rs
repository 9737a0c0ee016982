pub mod document_utils;
pub mod path_utils;
