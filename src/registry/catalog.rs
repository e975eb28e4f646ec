//! The built-in model table.

use super::{Category, ModelDescriptor};
use crate::factory::Vendor;
use crate::providers::Delivery;

/// One row of the built-in table: a descriptor and where it is served.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub descriptor: ModelDescriptor,
    pub vendor: Vendor,
    pub upstream_model: &'static str,
    /// Wrap with `<think>` reasoning extraction.
    pub extract_reasoning: bool,
    pub delivery: Delivery,
}

impl CatalogEntry {
    fn new(descriptor: ModelDescriptor, vendor: Vendor, upstream_model: &'static str) -> Self {
        Self {
            descriptor,
            vendor,
            upstream_model,
            extract_reasoning: false,
            delivery: Delivery::Streaming,
        }
    }

    fn thinking(mut self) -> Self {
        self.extract_reasoning = true;
        self
    }

    fn buffered(mut self) -> Self {
        self.delivery = Delivery::Buffered;
        self
    }
}

fn free(id: &str, label: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, label, Category::Free)
}

fn pro(id: &str, label: &str) -> ModelDescriptor {
    ModelDescriptor::new(id, label, Category::Pro).requires_auth().pro()
}

/// Default model when a request names none.
pub const DEFAULT_MODEL: &str = "scira-default";

pub fn builtin_models() -> Vec<CatalogEntry> {
    use Vendor::*;

    vec![
        CatalogEntry::new(
            free("scira-default", "Gemini 2.5 Flash")
                .describe("Google's advanced free LLM with vision support")
                .vision().pdf().free_unlimited().max_output_tokens(10_000),
            Google,
            "gemini-2.5-flash",
        ),
        CatalogEntry::new(
            pro("scira-grok-3", "Grok 3")
                .describe("xAI's recent smartest LLM")
                .max_output_tokens(16_000),
            Xai,
            "grok-3-fast",
        ),
        CatalogEntry::new(
            pro("scira-grok-4", "Grok 4")
                .describe("xAI's most intelligent vision LLM")
                .vision().reasoning().max_output_tokens(16_000),
            Xai,
            "grok-4",
        ),
        CatalogEntry::new(
            pro("scira-code", "Grok Code")
                .describe("xAI's advanced coding LLM")
                .reasoning().max_output_tokens(16_000),
            Xai,
            "grok-code-fast-1",
        ),
        CatalogEntry::new(
            free("scira-qwen-32b", "Qwen 3 32B")
                .describe("Alibaba's advanced reasoning LLM")
                .reasoning().max_output_tokens(40_960),
            Groq,
            "qwen/qwen3-32b",
        )
        .thinking(),
        CatalogEntry::new(
            free("scira-5-nano", "GPT 5 Nano")
                .describe("OpenAI's latest flagship nano LLM")
                .vision().pdf().requires_auth().max_output_tokens(128_000),
            OpenAi,
            "gpt-5-nano",
        ),
        CatalogEntry::new(
            pro("scira-5-mini", "GPT 5 Mini")
                .describe("OpenAI's latest flagship mini LLM")
                .vision().reasoning().pdf().max_output_tokens(128_000),
            OpenAi,
            "gpt-5-mini",
        ),
        CatalogEntry::new(
            pro("scira-gpt-oss-20", "OpenAI GPT OSS 20b")
                .describe("OpenAI's advanced small OSS LLM")
                .reasoning().max_output_tokens(8_000),
            Groq,
            "openai/gpt-oss-20b",
        )
        .thinking(),
        CatalogEntry::new(
            pro("scira-kimi-k2", "Kimi K2")
                .describe("MoonShot AI's advanced base LLM")
                .max_output_tokens(10_000),
            Groq,
            "moonshotai/kimi-k2-instruct",
        ),
        CatalogEntry::new(
            pro("scira-deepseek-v3", "DeepSeek V3.1")
                .describe("DeepSeek's advanced base LLM")
                .max_output_tokens(16_000),
            HuggingFace,
            "deepseek-ai/DeepSeek-V3.1:fireworks-ai",
        )
        .thinking(),
        CatalogEntry::new(
            pro("scira-qwen-coder", "Qwen 3 Coder 480B-A35B")
                .describe("Alibaba's advanced coding LLM")
                .reasoning().max_output_tokens(130_000),
            HuggingFace,
            "Qwen/Qwen3-Coder-480B-A35B-Instruct:cerebras",
        ),
        CatalogEntry::new(
            pro("scira-qwen-30", "Qwen 3 30B A3B Instruct")
                .describe("Qwen's advanced instruct LLM")
                .reasoning().max_output_tokens(100_000),
            HuggingFace,
            "Qwen/Qwen3-30B-A3B-Instruct-2507:nebius",
        ),
        CatalogEntry::new(
            pro("scira-qwen-30-think", "Qwen 3 30B A3B Thinking")
                .describe("Qwen's advanced thinking LLM")
                .reasoning().max_output_tokens(100_000),
            HuggingFace,
            "Qwen/Qwen3-30B-A3B-Thinking-2507:nebius",
        )
        .thinking(),
        CatalogEntry::new(
            pro("scira-qwen-235", "Qwen 3 235B A22B")
                .describe("Qwen's advanced instruct LLM")
                .reasoning().max_output_tokens(100_000),
            HuggingFace,
            "Qwen/Qwen3-235B-A22B-Instruct-2507:together",
        ),
        CatalogEntry::new(
            pro("scira-qwen-235-think", "Qwen 3 235B A22B Thinking")
                .describe("Qwen's advanced thinking LLM")
                .reasoning().max_output_tokens(100_000),
            HuggingFace,
            "Qwen/Qwen3-235B-A22B-Thinking-2507:novita",
        )
        .thinking(),
        CatalogEntry::new(
            pro("scira-glm-air", "GLM 4.5 Air")
                .describe("Zhipu AI's efficient base LLM")
                .reasoning().max_output_tokens(130_000),
            HuggingFace,
            "zai-org/GLM-4.5-Air:fireworks-ai",
        ),
        CatalogEntry::new(
            pro("scira-glm", "GLM 4.5")
                .describe("Zhipu AI's advanced base LLM")
                .reasoning().max_output_tokens(13_000),
            HuggingFace,
            "zai-org/GLM-4.5:fireworks-ai",
        )
        .thinking(),
        CatalogEntry::new(
            pro("scira-5", "GPT 5")
                .describe("OpenAI's latest flagship LLM")
                .vision().reasoning().pdf().max_output_tokens(128_000),
            OpenAi,
            "gpt-5",
        ),
        CatalogEntry::new(
            pro("scira-5-high", "GPT 5 (Max)")
                .describe("OpenAI's latest flagship reasoning LLM")
                .vision().reasoning().pdf().max_output_tokens(128_000),
            OpenAi,
            "gpt-5",
        ),
        CatalogEntry::new(
            pro("scira-anthropic", "Claude 4 Sonnet")
                .describe("Anthropic's most advanced LLM")
                .vision().pdf().max_output_tokens(8_000),
            Anthropic,
            "claude-sonnet-4-20250514",
        ),
        CatalogEntry::new(
            pro("scira-mistral-medium", "Mistral Medium")
                .describe("Mistral's medium LLM")
                .vision().pdf().max_output_tokens(8_000),
            Mistral,
            "mistral-medium-2508",
        ),
        CatalogEntry::new(
            free("scira-google", "Gemini 2.5 Flash")
                .describe("Google's advanced small LLM")
                .vision().pdf().free_unlimited().max_output_tokens(10_000),
            Google,
            "gemini-2.5-flash",
        ),
        CatalogEntry::new(
            free("scira-google-pro", "Gemini 2.5 Pro")
                .describe("Google's most advanced LLM")
                .vision().pdf().free_unlimited().max_output_tokens(10_000),
            Google,
            "gemini-2.5-pro",
        ),
        CatalogEntry::new(
            free("scira-google-flash-lite", "Gemini 2.5 Flash-Lite")
                .describe("Google's most cost-efficient model optimized for high throughput and low latency")
                .vision().pdf().free_unlimited().max_output_tokens(8_000),
            Google,
            "gemini-2.5-flash-lite",
        ),
        CatalogEntry::new(
            free("scira-google-flash-exp", "Gemini 2.5 Flash Experimental")
                .describe("Google's experimental flash model with latest features")
                .vision().pdf().experimental().free_unlimited().max_output_tokens(10_000),
            Google,
            "gemini-2.5-flash-exp",
        ),
        CatalogEntry::new(
            free("scira-google-thinking", "Gemini 2.0 Flash Thinking")
                .describe("Google's reasoning-capable flash model")
                .vision().reasoning().pdf().experimental().free_unlimited().max_output_tokens(10_000),
            Google,
            "gemini-2.0-flash-thinking-exp",
        ),
        CatalogEntry::new(
            free("scira-google-flash-8b", "Gemini 1.5 Flash 8B")
                .describe("Google's efficient small model")
                .vision().pdf().free_unlimited().max_output_tokens(8_000),
            Google,
            "gemini-1.5-flash-8b",
        ),
        CatalogEntry::new(
            ModelDescriptor::new("scira-llama-4", "Llama 4 Maverick", Category::Experimental)
                .describe("Meta's latest LLM")
                .vision().experimental().max_output_tokens(8_000),
            Groq,
            "meta-llama/llama-4-maverick-17b-128e-instruct",
        ),
        // Served but not offered in the model picker.
        CatalogEntry::new(
            ModelDescriptor::new("scira-nano", "Llama 3.3 70B", Category::Internal).requires_auth(),
            Groq,
            "llama-3.3-70b-versatile",
        ),
        CatalogEntry::new(
            ModelDescriptor::new("scira-name", "Llama 3.3 70B (titles)", Category::Internal)
                .requires_auth(),
            HuggingFace,
            "meta-llama/Llama-3.3-70B-Instruct:cerebras",
        )
        .buffered(),
        CatalogEntry::new(
            ModelDescriptor::new("scira-enhance", "Kimi K2 (enhance)", Category::Internal)
                .requires_auth(),
            Groq,
            "moonshotai/kimi-k2-instruct",
        ),
        CatalogEntry::new(
            ModelDescriptor::new("scira-haiku", "Claude 3.5 Haiku", Category::Internal)
                .requires_auth(),
            Anthropic,
            "claude-3-5-haiku-20241022",
        ),
    ]
}
