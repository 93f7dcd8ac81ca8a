use serde::{Deserialize, Serialize};

use super::job::JobType;

/// Priority of the ControlStop that closes a run; sorts after all work.
pub const CLOSING_STOP_PRIORITY: i32 = i32::MAX;

/// Default priority per job type. Lower numbers are processed first.
///
/// Only the relative order is fixed: control, include, index, archive, page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorityPolicy {
    #[serde(default = "default_control")]
    pub control: i32,
    #[serde(default = "default_include")]
    pub include: i32,
    #[serde(default = "default_index")]
    pub index: i32,
    #[serde(default = "default_archive")]
    pub archive: i32,
    #[serde(default = "default_page")]
    pub page: i32,
}

fn default_control() -> i32 {
    0
}

fn default_include() -> i32 {
    1
}

fn default_index() -> i32 {
    2
}

fn default_archive() -> i32 {
    3
}

fn default_page() -> i32 {
    5
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            control: default_control(),
            include: default_include(),
            index: default_index(),
            archive: default_archive(),
            page: default_page(),
        }
    }
}

impl PriorityPolicy {
    pub fn for_job(&self, job_type: JobType) -> i32 {
        match job_type {
            JobType::ControlStart | JobType::ControlStop => self.control,
            JobType::Include => self.include,
            JobType::Index => self.index,
            JobType::Archive => self.archive,
            JobType::Page => self.page,
        }
    }

    /// Checks the bands are strictly increasing and below the closing stop.
    pub fn validate(&self) -> Result<(), String> {
        let bands = [
            ("control", self.control),
            ("include", self.include),
            ("index", self.index),
            ("archive", self.archive),
            ("page", self.page),
        ];
        for pair in bands.windows(2) {
            let (lower_name, lower) = pair[0];
            let (upper_name, upper) = pair[1];
            if lower >= upper {
                return Err(format!(
                    "priority '{}' ({}) must be lower than '{}' ({})",
                    lower_name, lower, upper_name, upper
                ));
            }
        }
        if self.page >= CLOSING_STOP_PRIORITY {
            return Err(format!(
                "priority 'page' must be below {}",
                CLOSING_STOP_PRIORITY
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_order() {
        let policy = PriorityPolicy::default();
        assert!(policy.validate().is_ok());
        assert!(policy.for_job(JobType::Index) < policy.for_job(JobType::Page));
        assert!(policy.for_job(JobType::ControlStart) < policy.for_job(JobType::Include));
    }

    #[test]
    fn test_reordered_bands_are_rejected() {
        let policy = PriorityPolicy {
            index: 9,
            ..Default::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.contains("'index'"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let policy: PriorityPolicy = serde_json::from_str(r#"{"page": 50}"#).unwrap();
        assert_eq!(policy.page, 50);
        assert_eq!(policy.archive, 3);
    }
}
