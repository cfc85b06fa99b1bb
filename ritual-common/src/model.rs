use serde::Serialize;

/// A language model users may deploy from the dashboard.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct SupportedModel {
    pub id: &'static str,
    pub name: &'static str,
    pub quantize_options: &'static [&'static str],
    pub private: bool,
}

/// Allow-list of deployable public models. Gated models require a
/// HuggingFace API key on the deployed machine.
pub const PUBLIC_MODELS: &[SupportedModel] = &[
    SupportedModel {
        id: "timdettmers/guanaco-33b-merged",
        name: "Guanaco 33B merged",
        quantize_options: &["bitsandbytes"],
        private: false,
    },
    SupportedModel {
        id: "MetaIX/GPT4-X-Alpasta-30b",
        name: "GPT4-X Alpasta 30B",
        quantize_options: &["bitsandbytes"],
        private: false,
    },
    SupportedModel {
        id: "CalderaAI/30B-Lazarus",
        name: "Lazarus 30B",
        quantize_options: &["bitsandbytes", "none"],
        private: false,
    },
    SupportedModel {
        id: "huggyllama/llama-65b",
        name: "Llama 65B",
        quantize_options: &["bitsandbytes", "none"],
        private: false,
    },
    SupportedModel {
        id: "timdettmers/guanaco-65b-merged",
        name: "Guanaco 65B merged",
        quantize_options: &["bitsandbytes", "none"],
        private: false,
    },
    SupportedModel {
        id: "tiiuae/falcon-40b-instruct",
        name: "Falcon 40B Instruct",
        quantize_options: &["bitsandbytes", "none"],
        private: false,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-7b-hf",
        name: "Llama 2 7B",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-7b-chat-hf",
        name: "Llama 2 7B chat",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-13b-hf",
        name: "Llama 2 13B",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-13b-chat-hf",
        name: "Llama 2 13B chat",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-70b-hf",
        name: "Llama 2 70B",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
    SupportedModel {
        id: "meta-llama/Llama-2-70b-chat-hf",
        name: "Llama 2 70B chat",
        quantize_options: &["bitsandbytes", "none"],
        private: true,
    },
];

pub fn is_public_model(id: &str) -> bool {
    PUBLIC_MODELS.iter().any(|m| m.id == id)
}
