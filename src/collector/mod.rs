/// Collector module
///
/// Orchestration between configuration and an exchange `Collector`:
/// turns the configured subscription list into live streams.
///
/// Exchange-specific logic MUST NOT live here.
pub mod runner;
