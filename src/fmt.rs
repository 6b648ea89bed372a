#![macro_use]
#![allow(unused)]

//! Logging shims. With `defmt-03` enabled every level forwards to the matching `defmt` macro;
//! otherwise only the arguments are borrowed so call sites compile identically.

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! log_at {
    ($level:ident, $s:literal $(, $x:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt-03")]
            ::defmt::$level!($s $(, $x)*);
            #[cfg(not(feature = "defmt-03"))]
            let _ = ($( & $x ),*);
        }
    };
}

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! trace {
    ($($t:tt)*) => { log_at!(trace, $($t)*) };
}

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! debug {
    ($($t:tt)*) => { log_at!(debug, $($t)*) };
}

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! info {
    ($($t:tt)*) => { log_at!(info, $($t)*) };
}

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! warn {
    ($($t:tt)*) => { log_at!(warn, $($t)*) };
}

#[allow(unused_macros)]
#[collapse_debuginfo(yes)]
macro_rules! error {
    ($($t:tt)*) => { log_at!(error, $($t)*) };
}
