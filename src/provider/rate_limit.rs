use crate::forensic::config::RateLimitSettings;
use crate::provider::gateway::ProviderKind;
use std::time::Duration;

const SAFETY_MARGIN: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePolicy {
    pub tokens_per_minute: Option<u64>,
    pub delay: Duration,
}

/// `60 / (tpm / tokens_per_request) * 1.2` seconds between requests.
pub fn delay_for_budget(tokens_per_minute: u64, tokens_per_request: u64) -> Duration {
    if tokens_per_minute == 0 || tokens_per_request == 0 {
        return Duration::ZERO;
    }
    let requests_per_minute = tokens_per_minute as f64 / tokens_per_request as f64;
    Duration::from_secs_f64(60.0 / requests_per_minute * SAFETY_MARGIN)
}

pub fn policy_for(kind: ProviderKind, settings: &RateLimitSettings) -> RatePolicy {
    let tpm = match kind {
        ProviderKind::Local => {
            return RatePolicy {
                tokens_per_minute: None,
                delay: Duration::from_millis(settings.local_delay_ms),
            };
        }
        ProviderKind::OpenAi => settings.openai_tpm,
        ProviderKind::Anthropic => settings.anthropic_tpm,
    };
    RatePolicy {
        tokens_per_minute: Some(tpm),
        delay: delay_for_budget(tpm, settings.estimated_tokens_per_request),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_thousand_tpm_waits_three_point_six_seconds() {
        let delay = delay_for_budget(30_000, 1_500);
        assert!((delay.as_secs_f64() - 3.6).abs() < 1e-6);
    }

    #[test]
    fn anthropic_default_budget_is_faster_than_openai() {
        let settings = RateLimitSettings::default();
        let openai = policy_for(ProviderKind::OpenAi, &settings);
        let anthropic = policy_for(ProviderKind::Anthropic, &settings);
        assert!(anthropic.delay < openai.delay);
        assert!((anthropic.delay.as_secs_f64() - 2.7).abs() < 1e-6);
    }

    #[test]
    fn local_uses_fixed_short_delay() {
        let settings = RateLimitSettings::default();
        let policy = policy_for(ProviderKind::Local, &settings);
        assert_eq!(policy.delay, Duration::from_millis(500));
        assert_eq!(policy.tokens_per_minute, None);
    }

    #[test]
    fn zero_budget_disables_waiting() {
        assert_eq!(delay_for_budget(0, 1_500), Duration::ZERO);
    }
}
