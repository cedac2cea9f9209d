mod execution_tests;
mod lifecycle_tests;
mod module_tests;
mod pool_service_tests;
#[cfg(feature = "v8")]
mod v8_tests;
