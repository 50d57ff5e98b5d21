// src/llm/pricing.rs
// USD cost computation from provider token counts

/// Per-model price table (USD per 1M tokens).
/// Source: https://openai.com/api/pricing/
pub struct ModelPricing;

impl ModelPricing {
    pub const GPT4O_INPUT_PRICE_PER_M: f64 = 2.50;
    pub const GPT4O_OUTPUT_PRICE_PER_M: f64 = 10.00;

    pub const GPT4O_MINI_INPUT_PRICE_PER_M: f64 = 0.15;
    pub const GPT4O_MINI_OUTPUT_PRICE_PER_M: f64 = 0.60;

    pub const EMBEDDING_3_LARGE_PRICE_PER_M: f64 = 0.13;

    /// Cost of a chat call for the given model
    pub fn chat_cost(model: &str, prompt_tokens: i64, completion_tokens: i64) -> f64 {
        let (input_price, output_price) = if model.contains("mini") {
            (
                Self::GPT4O_MINI_INPUT_PRICE_PER_M,
                Self::GPT4O_MINI_OUTPUT_PRICE_PER_M,
            )
        } else {
            (Self::GPT4O_INPUT_PRICE_PER_M, Self::GPT4O_OUTPUT_PRICE_PER_M)
        };

        (prompt_tokens as f64 / 1_000_000.0) * input_price
            + (completion_tokens as f64 / 1_000_000.0) * output_price
    }

    /// Cost of an embedding call (input tokens only)
    pub fn embedding_cost(tokens: i64) -> f64 {
        (tokens as f64 / 1_000_000.0) * Self::EMBEDDING_3_LARGE_PRICE_PER_M
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpt4o_pricing() {
        // 100k input, 10k output
        // Input: 0.1 * $2.50 = $0.25
        // Output: 0.01 * $10 = $0.10
        let cost = ModelPricing::chat_cost("gpt-4o", 100_000, 10_000);
        assert!((cost - 0.35).abs() < 0.001);
    }

    #[test]
    fn test_mini_is_cheaper() {
        let full = ModelPricing::chat_cost("gpt-4o", 100_000, 10_000);
        let mini = ModelPricing::chat_cost("gpt-4o-mini", 100_000, 10_000);
        assert!(mini < full);
    }
}
