pub mod tracing_setup;
