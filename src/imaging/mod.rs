// Image intake and processing
// The validator gates raw uploads (size, signature, dimensions, malware);
// the processor turns an accepted upload into the closed variant set.

pub mod processor;
pub mod scanner;
pub mod validator;

pub use processor::{ImageProcessor, ProcessedVariant, ProcessingError, Variant};
pub use scanner::{ClamavScanner, MalwareScanner, ScanVerdict};
pub use validator::{ImageValidator, ScanOutcome, ValidatedUpload, ValidationError};
