mod cactus;
mod comparison;
mod ratio;
mod run;

pub use run::run;

/// `?start, ?start+1, ...` for `count` bound parameters.
fn numbered_placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}
