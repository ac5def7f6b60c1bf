/// Build an `Error` variant, optionally logging at the call site first.
///
/// ```ignore
/// err!(Store("event stream read failed: {e}"))
/// err!("plain message: {0}", thing)
/// ```
#[macro_export]
macro_rules! err {
	($variant:ident($($args:tt),+)) => {
		$crate::Error::$variant(::std::format!($($args),+))
	};
	($string:literal $(, $($args:tt)*)?) => {
		$crate::Error::Err(::std::format!($string $(, $($args)*)?))
	};
}

/// `Err(err!(...))`, for use in `?`-returning functions.
#[macro_export]
macro_rules! Err {
	($($args:tt)*) => {
		Err($crate::err!($($args)*))
	};
}
