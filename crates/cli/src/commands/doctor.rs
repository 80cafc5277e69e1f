use relaybot_agent::build_generator;
use relaybot_core::config::{AppConfig, LlmProvider, LoadOptions};
use serde::Serialize;

use super::CommandResult;

const EXIT_CHECKS_FAILED: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_CHECKS_FAILED };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_slack_tokens(&config));
            checks.push(check_llm_provider(&config));
            checks.push(check_conversation_limits(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["slack_token_readiness", "llm_provider_readiness", "conversation_limits"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_slack_tokens(config: &AppConfig) -> DoctorCheck {
    let details = match &config.slack.bot_user_id {
        Some(bot_user_id) => {
            format!("token formats validated; replies from `{bot_user_id}` are ignored")
        }
        None => "token formats validated; bot_user_id unset, relying on bot_id to skip own messages"
            .to_string(),
    };
    DoctorCheck { name: "slack_token_readiness", status: CheckStatus::Pass, details }
}

fn check_llm_provider(config: &AppConfig) -> DoctorCheck {
    match build_generator(&config.llm) {
        Ok(_) => {
            let endpoint = config.llm.base_url.as_deref().unwrap_or(match config.llm.provider {
                LlmProvider::OpenAi | LlmProvider::Anthropic => "provider default endpoint",
                LlmProvider::Ollama => "http://localhost:11434",
            });
            DoctorCheck {
                name: "llm_provider_readiness",
                status: CheckStatus::Pass,
                details: format!(
                    "{} client ready for model `{}` via {endpoint}",
                    config.llm.provider.as_str(),
                    config.llm.model
                ),
            }
        }
        Err(error) => DoctorCheck {
            name: "llm_provider_readiness",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_conversation_limits(config: &AppConfig) -> DoctorCheck {
    DoctorCheck {
        name: "conversation_limits",
        status: CheckStatus::Pass,
        details: format!(
            "history {} messages, idle expiry {}ms, dedupe ttl {}ms, sweeps every {}ms/{}ms",
            config.conversation.max_history_length,
            config.conversation.expiration_ms,
            config.dedupe.ttl_ms,
            config.conversation.sweep_interval_ms,
            config.dedupe.sweep_interval_ms
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
