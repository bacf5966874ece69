/// Directory of tab-tab delimited line files.
pub mod line_file;
