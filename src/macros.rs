pub use enclose::*;

/// `computed!((a, b) => a.get() + b.get())` clones the listed handles into
/// a computed on the default context.
#[macro_export]
macro_rules! computed {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::computed($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::computed(move || { $($b)* })
    };
}

#[macro_export]
macro_rules! autorun {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::autorun($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::autorun(move || { $($b)* })
    };
}

#[macro_export]
macro_rules! action {
    (( $($d_tt:tt)* ) => $($b:tt)*) => {
        $crate::action($crate::macros::enclose!(($( $d_tt )*) move || { $($b)* }))
    };
    (=> $($b:tt)*) => {
        $crate::action(move || { $($b)* })
    };
}
