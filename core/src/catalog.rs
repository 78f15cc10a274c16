//! The fixed list of catalog items eligible for rating refresh.

/// Amazon ASINs for every book and audiobook on the site, in refresh order.
pub const CATALOG: [&str; 14] = [
    "B0FSSW9XGX", // The Doubles
    "B0FVF3ZRJQ", // Epicurus 2.0
    "B0FWTY1VVS", // The ADHD Brain
    "B0FXT51Y14", // Trading Psychology & Neuroscience
    "B0FS9Y48RX", // The Last Beautiful Game
    "B0FN3M4DFZ", // The Sight Eater
    "B0FP9MRCJM", // Grandma's Illegal Dragon Racing Circuit
    "B0FLT5SKPL", // Familiar System
    "B0FMPYTC8H", // A Kind of Forgery
    "B0FNM5TB9Y", // Momentum Wars
    "B0FMXKQ8BJ", // Chronophage
    "B0FNCPTGPS", // Everything Thinks
    "B0FR32348P", // Last Channel of Nana Quantum
    "B0FQTGSFJG", // Quantum Sock Mismatch
];

pub fn default_catalog() -> Vec<String> {
    CATALOG.iter().map(|s| s.to_string()).collect()
}
