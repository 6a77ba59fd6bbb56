use serde::{Deserialize, Serialize};

pub const CRITICAL_DEPENDENT_THRESHOLD: usize = 50;
pub const HIGH_DEPENDENT_THRESHOLD: usize = 20;
pub const MEDIUM_DEPENDENT_THRESHOLD: usize = 5;
pub const LOW_DEPENDENT_THRESHOLD: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Safe => "safe",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeverityInputs {
    pub essential: bool,
    pub transitive_count: usize,
    pub critical_service_running: bool,
    /// The reverse-dependency closure could not be computed, so
    /// `transitive_count` is a lower bound.
    pub dependents_unknown: bool,
}

#[derive(Debug)]
pub struct SeverityRule {
    pub name: &'static str,
    pub verdict: Severity,
    pub applies: fn(&SeverityInputs) -> bool,
}

fn is_essential(inputs: &SeverityInputs) -> bool {
    inputs.essential
}

fn has_critical_dependents(inputs: &SeverityInputs) -> bool {
    inputs.transitive_count >= CRITICAL_DEPENDENT_THRESHOLD
}

fn runs_critical_service(inputs: &SeverityInputs) -> bool {
    inputs.critical_service_running
}

fn has_many_dependents(inputs: &SeverityInputs) -> bool {
    inputs.transitive_count >= HIGH_DEPENDENT_THRESHOLD
}

fn dependents_unknown(inputs: &SeverityInputs) -> bool {
    inputs.dependents_unknown
}

fn has_several_dependents(inputs: &SeverityInputs) -> bool {
    inputs.transitive_count >= MEDIUM_DEPENDENT_THRESHOLD
}

fn has_dependents(inputs: &SeverityInputs) -> bool {
    inputs.transitive_count >= LOW_DEPENDENT_THRESHOLD
}

fn always(_: &SeverityInputs) -> bool {
    true
}

pub const SEVERITY_RULES: &[SeverityRule] = &[
    SeverityRule {
        name: "essential_package",
        verdict: Severity::Critical,
        applies: is_essential,
    },
    SeverityRule {
        name: "critical_dependent_count",
        verdict: Severity::Critical,
        applies: has_critical_dependents,
    },
    SeverityRule {
        name: "critical_service_running",
        verdict: Severity::Critical,
        applies: runs_critical_service,
    },
    SeverityRule {
        name: "high_dependent_count",
        verdict: Severity::High,
        applies: has_many_dependents,
    },
    SeverityRule {
        name: "dependents_unknown",
        verdict: Severity::Medium,
        applies: dependents_unknown,
    },
    SeverityRule {
        name: "medium_dependent_count",
        verdict: Severity::Medium,
        applies: has_several_dependents,
    },
    SeverityRule {
        name: "low_dependent_count",
        verdict: Severity::Low,
        applies: has_dependents,
    },
    SeverityRule {
        name: "no_dependents",
        verdict: Severity::Safe,
        applies: always,
    },
];

/// First rule in [`SEVERITY_RULES`] that applies.
pub fn classify(inputs: &SeverityInputs) -> &'static SeverityRule {
    SEVERITY_RULES
        .iter()
        .find(|rule| (rule.applies)(inputs))
        .unwrap_or(&SEVERITY_RULES[SEVERITY_RULES.len() - 1])
}

pub fn is_safe_to_remove(severity: Severity, critical_service_running: bool) -> bool {
    severity <= Severity::Low && !critical_service_running
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(essential: bool, transitive_count: usize, critical_service_running: bool) -> SeverityInputs {
        SeverityInputs {
            essential,
            transitive_count,
            critical_service_running,
            dependents_unknown: false,
        }
    }

    #[test]
    fn test_thresholds() {
        let verdict = |count| classify(&inputs(false, count, false)).verdict;
        assert_eq!(verdict(0), Severity::Safe);
        assert_eq!(verdict(1), Severity::Low);
        assert_eq!(verdict(4), Severity::Low);
        assert_eq!(verdict(5), Severity::Medium);
        assert_eq!(verdict(19), Severity::Medium);
        assert_eq!(verdict(20), Severity::High);
        assert_eq!(verdict(49), Severity::High);
        assert_eq!(verdict(50), Severity::Critical);
    }

    #[test]
    fn test_essential_forces_critical() {
        let rule = classify(&inputs(true, 0, false));
        assert_eq!(rule.verdict, Severity::Critical);
        assert_eq!(rule.name, "essential_package");
    }

    #[test]
    fn test_running_critical_service_forces_critical() {
        let rule = classify(&inputs(false, 2, true));
        assert_eq!(rule.verdict, Severity::Critical);
        assert_eq!(rule.name, "critical_service_running");
    }

    #[test]
    fn test_unknown_dependents_are_never_safe() {
        let unknown = |count| SeverityInputs {
            transitive_count: count,
            dependents_unknown: true,
            ..SeverityInputs::default()
        };
        let rule = classify(&unknown(0));
        assert_eq!(rule.name, "dependents_unknown");
        assert_eq!(rule.verdict, Severity::Medium);
        assert!(!is_safe_to_remove(rule.verdict, false));

        assert_eq!(classify(&unknown(3)).verdict, Severity::Medium);
        assert_eq!(classify(&unknown(25)).name, "high_dependent_count");
        let essential = SeverityInputs {
            essential: true,
            ..unknown(0)
        };
        assert_eq!(classify(&essential).name, "essential_package");
    }

    #[test]
    fn test_monotonic_in_dependent_count() {
        for essential in [false, true] {
            for service in [false, true] {
                for unknown in [false, true] {
                    let mut previous = Severity::Safe;
                    for count in 0..200 {
                        let current = classify(&SeverityInputs {
                            dependents_unknown: unknown,
                            ..inputs(essential, count, service)
                        })
                        .verdict;
                        assert!(
                            current >= previous,
                            "severity dropped from {} to {} at count {}",
                            previous,
                            current,
                            count
                        );
                        previous = current;
                    }
                }
            }
        }
    }

    #[test]
    fn test_chain_ends_in_catch_all() {
        let last = SEVERITY_RULES.last().unwrap();
        assert!((last.applies)(&SeverityInputs::default()));
        assert_eq!(last.verdict, Severity::Safe);
    }

    #[test]
    fn test_safe_to_remove() {
        assert!(is_safe_to_remove(Severity::Safe, false));
        assert!(is_safe_to_remove(Severity::Low, false));
        assert!(!is_safe_to_remove(Severity::Low, true));
        assert!(!is_safe_to_remove(Severity::Medium, false));
        assert!(!is_safe_to_remove(Severity::Critical, false));
    }

    #[test]
    fn test_serialized_spelling() {
        assert_eq!(serde_json::to_string(&Severity::Critical).unwrap(), "\"critical\"");
        assert_eq!(serde_json::from_str::<Severity>("\"medium\"").unwrap(), Severity::Medium);
        assert!(Severity::Safe < Severity::Low && Severity::High < Severity::Critical);
    }
}
