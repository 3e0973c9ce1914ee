pub mod confusion_matrix;
pub mod dataset;
