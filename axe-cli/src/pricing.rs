//! Model pricing in USD per million tokens.

/// (model prefix, input $/M, output $/M)
const PRICES: [(&str, f64, f64); 11] = [
    ("claude-3-5-sonnet", 3.0, 15.0),
    ("claude-sonnet-4", 3.0, 15.0),
    ("claude-3-5-haiku", 0.8, 4.0),
    ("claude-3-haiku", 0.25, 1.25),
    ("claude-3-opus", 15.0, 75.0),
    ("claude-opus-4", 15.0, 75.0),
    ("gpt-4o", 2.5, 10.0),
    ("gpt-4o-mini", 0.15, 0.6),
    ("gpt-4-turbo", 10.0, 30.0),
    ("deepseek-chat", 0.27, 1.10),
    ("deepseek-coder", 0.14, 0.28),
];

/// Exact match first, then longest prefix match.
pub fn lookup(model: &str) -> Option<(f64, f64)> {
    let model = model.to_ascii_lowercase();
    if let Some((_, input, output)) = PRICES.iter().find(|(name, _, _)| *name == model) {
        return Some((*input, *output));
    }
    PRICES
        .iter()
        .filter(|(name, _, _)| model.starts_with(name))
        .max_by_key(|(name, _, _)| name.len())
        .map(|(_, input, output)| (*input, *output))
}

/// Cost in USD; zero for unknown models.
pub fn cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    match lookup(model) {
        Some((input, output)) => {
            input_tokens as f64 / 1e6 * input + output_tokens as f64 / 1e6 * output
        }
        None => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_lookup_matches_dated_models() {
        assert_eq!(lookup("claude-sonnet-4-20250514"), Some((3.0, 15.0)));
        assert_eq!(lookup("GPT-4o"), Some((2.5, 10.0)));
        assert_eq!(lookup("unknown-model"), None);
    }

    #[test]
    fn longest_prefix_wins() {
        // gpt-4o-mini also has prefix gpt-4o; the longer entry applies.
        assert_eq!(lookup("gpt-4o-mini-2024"), Some((0.15, 0.6)));
    }

    #[test]
    fn cost_computation() {
        let value = cost("claude-sonnet-4-20250514", 1_000_000, 100_000);
        assert!((value - 4.5).abs() < 1e-9);
        assert_eq!(cost("unknown-model", 1_000_000, 1_000_000), 0.0);
    }
}
