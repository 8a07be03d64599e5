//! Text model name parsing.
//!
//! Splits names like "Llama-3-8B-Instruct-Q4_K_M" into base name, size,
//! variant and quantization so that quantization variants of the same base
//! model can be grouped together.

use regex::Regex;
use std::sync::LazyLock;

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    // 7B, 13B, 1.5B, 3.5K, and MoE shapes like 8x7B
    Regex::new(r"(?i)\b(\d+x\d+[BMK]|\d+\.?\d*[BMK])\b").expect("size regex")
});

static QUANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Q[2-8](?:_K)?(?:_[SMLH])?|GGUF|GGML|GPTQ|AWQ|EXL2|fp16|fp32|int8|int4)\b")
        .expect("quant regex")
});

static VARIANT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(Instruct|Chat|Code|Base|Uncensored|Finetune|FT|turbo|preview|latest)\b")
        .expect("variant regex")
});

/// Structured components of a text model name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedModelName {
    pub original_name: String,
    pub base_name: String,
    pub size: Option<String>,
    pub variant: Option<String>,
    pub quant: Option<String>,
}

/// Parse a model name into its components.
pub fn parse_model_name(model_name: &str) -> ParsedModelName {
    let mut remainder = model_name.to_string();
    let mut size = None;
    let mut quant = None;
    let mut variant = None;

    if let Some(m) = SIZE_RE.find(&remainder) {
        size = Some(m.as_str().to_uppercase());
        remainder.replace_range(m.range(), "");
    }
    if let Some(m) = QUANT_RE.find(&remainder) {
        quant = Some(m.as_str().to_uppercase());
        remainder.replace_range(m.range(), "");
    }
    if let Some(m) = VARIANT_RE.find(&remainder) {
        variant = Some(m.as_str().to_string());
        remainder.replace_range(m.range(), "");
    }

    let mut base_name = remainder;
    for separator in ["--", "__", "  ", ".."] {
        while base_name.contains(separator) {
            base_name = base_name.replace(separator, &separator[..1]);
        }
    }
    let base_name = base_name.trim_matches(&['-', '_', ' ', '.'][..]).to_string();

    let base_name = if base_name.is_empty() {
        model_name.to_string()
    } else {
        base_name
    };

    ParsedModelName {
        original_name: model_name.to_string(),
        base_name,
        size,
        variant,
        quant,
    }
}

/// Base name used as the grouping key for a text model.
pub fn get_base_model_name(model_name: &str) -> String {
    parse_model_name(model_name).base_name
}

/// Whether the name carries a quantization marker.
pub fn is_quantized_variant(model_name: &str) -> bool {
    parse_model_name(model_name).quant.is_some()
}
