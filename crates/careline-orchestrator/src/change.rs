use careline_core::ClinicianBrief;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Lab entries containing one of these markers (case-insensitive) count as
/// clinically important.
pub const CRITICAL_LAB_MARKERS: [&str; 2] = ["critical", "abnormal"];

/// Which parts of a regenerated brief differ in a way clinicians care about.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeAssessment {
    /// There was no earlier brief to compare against.
    pub first_generation: bool,
    /// A red flag appeared.
    pub new_red_flags: bool,
    /// A problem-list entry appeared.
    pub new_problems: bool,
    /// A critical or abnormal lab appeared.
    pub new_critical_labs: bool,
}

impl ChangeAssessment {
    /// Whether any signal fired.
    pub fn is_significant(&self) -> bool {
        self.first_generation || self.new_red_flags || self.new_problems || self.new_critical_labs
    }
}

/// Compare two brief generations. Removals and reordering never count;
/// only entries present in `current` but absent from `previous` do.
pub fn assess(previous: Option<&ClinicianBrief>, current: &ClinicianBrief) -> ChangeAssessment {
    let Some(previous) = previous else {
        return ChangeAssessment {
            first_generation: true,
            ..ChangeAssessment::default()
        };
    };

    ChangeAssessment {
        first_generation: false,
        new_red_flags: has_new_entry(&previous.red_flags, &current.red_flags, |_| true),
        new_problems: has_new_entry(&previous.problem_list, &current.problem_list, |_| true),
        new_critical_labs: has_new_entry(&previous.key_labs, &current.key_labs, is_critical_lab),
    }
}

/// Shorthand for `assess(previous, current).is_significant()`.
pub fn is_significant_change(previous: Option<&ClinicianBrief>, current: &ClinicianBrief) -> bool {
    assess(previous, current).is_significant()
}

fn has_new_entry(old: &[String], new: &[String], keep: impl Fn(&str) -> bool) -> bool {
    let seen: HashSet<&str> = old.iter().map(String::as_str).collect();
    new.iter()
        .map(String::as_str)
        .any(|entry| !seen.contains(entry) && keep(entry))
}

fn is_critical_lab(entry: &str) -> bool {
    let lower = entry.to_lowercase();
    CRITICAL_LAB_MARKERS.iter().any(|m| lower.contains(m))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn brief(problems: &[&str], labs: &[&str], flags: &[&str]) -> ClinicianBrief {
        let v = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        ClinicianBrief {
            id: "b1".into(),
            referral_id: "r1".into(),
            patient_id: "p1".into(),
            problem_list: v(problems),
            current_medications: vec![],
            allergies: vec![],
            key_labs: v(labs),
            red_flags: v(flags),
            clinical_summary: String::new(),
            recommendations: vec![],
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_generation_is_significant() {
        let b = brief(&[], &[], &[]);
        let a = assess(None, &b);
        assert!(a.first_generation);
        assert!(a.is_significant());
    }

    #[test]
    fn test_identical_briefs_not_significant() {
        let b = brief(&["Hypertension"], &["LDL 190 (abnormal)"], &["Chest pain"]);
        assert!(!is_significant_change(Some(&b), &b.clone()));
    }

    #[test]
    fn test_new_red_flag() {
        let old = brief(&[], &[], &["Chest pain"]);
        let new = brief(&[], &[], &["Chest pain", "Syncope"]);
        let a = assess(Some(&old), &new);
        assert!(a.new_red_flags);
        assert!(a.is_significant());
    }

    #[test]
    fn test_new_problem() {
        let old = brief(&["Hypertension"], &[], &[]);
        let new = brief(&["Hypertension", "Type 2 diabetes"], &[], &[]);
        assert!(assess(Some(&old), &new).new_problems);
    }

    #[test]
    fn test_new_labs_only_count_when_critical() {
        let old = brief(&[], &["A1c 6.1 (normal)"], &[]);
        let routine = brief(&[], &["A1c 6.1 (normal)", "CBC normal range"], &[]);
        assert!(!is_significant_change(Some(&old), &routine));

        let critical = brief(&[], &["A1c 6.1 (normal)", "Troponin 2.1 (CRITICAL)"], &[]);
        assert!(assess(Some(&old), &critical).new_critical_labs);

        let abnormal = brief(&[], &["Potassium 5.9 (Abnormal)"], &[]);
        assert!(is_significant_change(Some(&old), &abnormal));
    }

    #[test]
    fn test_removals_and_reordering_ignored() {
        let old = brief(&["A", "B"], &["X critical"], &["F1", "F2"]);
        let new = brief(&["B"], &[], &["F2", "F1"]);
        assert!(!is_significant_change(Some(&old), &new));
    }
}
