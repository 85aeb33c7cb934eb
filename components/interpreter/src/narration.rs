//! Lines emitted by `DEPLETE`

use rand::seq::SliceRandom;
use rand::Rng;

const NARRATIONS: &[&str] = &[
    "Funds reallocated for 'urgent needs'",
    "Budget optimization succeeded (into a private account)",
    "Spending efficiency target achieved",
    "Budget realized... overseas",
];

/// Pick a narration line
pub(crate) fn pick<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    NARRATIONS.choose(rng).copied().unwrap_or(NARRATIONS[0])
}
