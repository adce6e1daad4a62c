/// Recommended error type for code built on top of the runner, such as driver implementations.
/// This type is compatible with the results returned from the capability traits so you can use
/// `?` to propagate errors.
pub type HarnessResult<T> = anyhow::Result<T>;
