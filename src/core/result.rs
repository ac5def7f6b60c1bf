/// The crate-wide `Result` alias. Defaults to `()` for fire-and-forget
/// operations, matching the teacher's convention of writing `Result` rather
/// than `Result<()>` at nearly every call site.
pub type Result<T = (), E = crate::Error> = std::result::Result<T, E>;
