/// Writes the run artifacts to the output directory.
pub mod formatter;
/// Builds the Markdown run summary.
pub mod report;
