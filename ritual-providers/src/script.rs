//! Startup-script assembly for newly provisioned machines: validates the
//! user's run configuration against the option table, renders the options as
//! CLI flags, and plugs environment secrets into the container bootstrap
//! script.

use ritual_common::{Error, Result, RunConfig};
use serde_json::Value;
use std::env;

pub const EMPTY_VALUE: &str = "none";

#[derive(Debug, Clone, Copy)]
pub enum RunOptionKind {
    /// Numeric value bounded to an inclusive range.
    Continuous { min: f64, max: f64 },
    /// One of a fixed set of values.
    Categorical { values: &'static [&'static str] },
    /// Free-form text.
    Input,
    /// Value constrained elsewhere (model allow-list, provider semantics).
    Other,
}

#[derive(Debug, Clone, Copy)]
pub struct RunOption {
    pub name: &'static str,
    pub key: &'static str,
    pub kind: RunOptionKind,
    pub optional: bool,
}

/// Run configuration options, in flag order.
pub static RUN_OPTIONS: &[RunOption] = &[
    RunOption {
        name: "Model",
        key: "model_id",
        kind: RunOptionKind::Other,
        optional: false,
    },
    RunOption {
        name: "Quantize",
        key: "quantize",
        kind: RunOptionKind::Other,
        optional: true,
    },
    RunOption {
        name: "Max Input Length",
        key: "max_input_length",
        kind: RunOptionKind::Continuous {
            min: 24.0,
            max: 8192.0,
        },
        optional: true,
    },
    RunOption {
        name: "Max Concurrent Requests",
        key: "max_concurrent_requests",
        kind: RunOptionKind::Continuous {
            min: 1.0,
            max: 400.0,
        },
        optional: true,
    },
    RunOption {
        name: "Max Total Tokens",
        key: "max_total_tokens",
        kind: RunOptionKind::Continuous {
            min: 24.0,
            max: 8192.0,
        },
        optional: true,
    },
    RunOption {
        name: "DType",
        key: "dtype",
        kind: RunOptionKind::Categorical {
            values: &[EMPTY_VALUE, "float16", "bfloat16"],
        },
        optional: true,
    },
    RunOption {
        name: "Max Best of",
        key: "max_best_of",
        kind: RunOptionKind::Continuous {
            min: 1.0,
            max: 12.0,
        },
        optional: true,
    },
    RunOption {
        name: "Weights Cache Override",
        key: "weights_cache_override",
        kind: RunOptionKind::Input,
        optional: true,
    },
    RunOption {
        name: "Max Stop Sequences",
        key: "max_stop_sequences",
        kind: RunOptionKind::Continuous {
            min: 1.0,
            max: 100.0,
        },
        optional: true,
    },
];

/// Empty strings, zero and null all mean "not set" for option values.
fn is_set(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Check that all run config parameters are valid according to the option
/// table and engine semantics.
pub fn validate_run_config(run_config: &RunConfig) -> Result<()> {
    for option in RUN_OPTIONS {
        // Missing required option
        if !option.optional && !run_config.contains_key(option.key) {
            return Err(Error::validation(format!(
                "Missing required parameter {}.",
                option.key
            )));
        }

        // Sanity checks
        match option.kind {
            RunOptionKind::Categorical { values } => {
                if let Some(value) = run_config.get(option.key).and_then(Value::as_str) {
                    if !values.contains(&value) {
                        return Err(Error::validation(format!(
                            "{} is not a valid {} value.",
                            value, option.key
                        )));
                    }
                }
            }
            RunOptionKind::Continuous { min, max } => {
                if let Some(value) = run_config.get(option.key).and_then(Value::as_f64) {
                    if value > max || value < min {
                        return Err(Error::validation(format!(
                            "{} is out of range ({} - {}).",
                            option.key, min, max
                        )));
                    }
                }
            }
            RunOptionKind::Input | RunOptionKind::Other => {}
        }
    }

    // Check model id is provided
    if !run_config.get("model_id").map(is_set).unwrap_or(false) {
        return Err(Error::validation("No model_id provided."));
    }

    // DType and quantize are mutually exclusive
    let dtype = run_config
        .get("dtype")
        .and_then(Value::as_str)
        .unwrap_or(EMPTY_VALUE);
    let quantize = run_config
        .get("quantize")
        .and_then(Value::as_str)
        .unwrap_or(EMPTY_VALUE);
    if dtype != EMPTY_VALUE && quantize != EMPTY_VALUE {
        return Err(Error::validation("Dtype cannot be used on quantized models."));
    }

    // Input token limit must be lower than total limit
    if let (Some(input), Some(total)) = (
        run_config.get("max_input_length").and_then(Value::as_f64),
        run_config.get("max_total_tokens").and_then(Value::as_f64),
    ) {
        if input >= total {
            return Err(Error::validation(
                "Max total tokens must be greater than max input length.",
            ));
        }
    }

    Ok(())
}

/// Formats run config options as CLI flags for the inference container.
pub fn format_run_config_flags(run_config: &RunConfig) -> String {
    let mut flags = String::new();
    for option in RUN_OPTIONS {
        let value = run_config.get(option.key);

        // Skip optional flags if empty
        if option.optional {
            if let Some(value) =
                value.filter(|v| is_set(v) && v.as_str() != Some(EMPTY_VALUE))
            {
                flags.push_str(&format!(
                    "--{} {} ",
                    option.key.replace('_', "-"),
                    render_value(value)
                ));
            }
            continue;
        }

        // All other flags are required
        flags.push_str(&format!(
            "--{} {} ",
            option.key.replace('_', "-"),
            value.map(render_value).unwrap_or_default()
        ));
    }
    flags
}

fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Renders the container bootstrap script with environment secrets plugged
/// in. Fails before any remote side effect when a required secret is absent.
pub fn format_startup_script(num_shard: i32, run_config: &RunConfig) -> Result<String> {
    let [Some(db_host), Some(db_port), Some(db_user), Some(db_pass), Some(db_name), Some(dockerhub_user), Some(image_tag)] =
        [
            "DB_HOST",
            "DB_PORT",
            "DB_USER",
            "DB_PASS",
            "DB_NAME",
            "DOCKERHUB_USER",
            "DOCKERHUB_TGI_IMAGE_TAG",
        ]
        .map(env_var)
    else {
        return Err(Error::validation(
            "Required env variables missing for startup script.",
        ));
    };

    let hf_api_flag = env_var("HF_API_KEY")
        .map(|key| format!("-e HUGGING_FACE_HUB_TOKEN={key}"))
        .unwrap_or_default();
    let image_name = format!("{dockerhub_user}/{image_tag}");
    let run_flags = format_run_config_flags(run_config);

    Ok(format!(
        r#" yes | (sudo apt update);
# For non-MLiaB-os
sudo docker --version &> /dev/null && echo "Docker is installed" || ( sudo curl -fsSL https://get.docker.com -o get-docker.sh && sudo sh get-docker.sh )

# Pull image from Dockerhub on first boot
if sudo docker image inspect {image_name} &> /dev/null; then echo "Docker image {image_name} exists."; else (sudo docker pull {image_name}) > build_log.txt 2>&1; fi

# Start existing docker container, or run image
CONTAINER_ID=$(sudo docker ps -a -q --filter "ancestor={image_name}" --latest)
if [ -z "$CONTAINER_ID" ]; then sudo docker run --gpus all --shm-size 1g -p 8080:80 -v /data:/data -e CLUSTER_ID=$(hostname) -e DB_URL={db_host} -e DB_PORT={db_port} -e DB_USER={db_user} -e DB_PASS={db_pass} -e DB_NAME={db_name} {hf_api_flag} {image_name} --num-shard {num_shard} {run_flags}; else sudo docker start $CONTAINER_ID; fi"#
    ))
}
