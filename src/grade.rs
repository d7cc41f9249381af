use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "A-")]
    AMinus,
    #[serde(rename = "B")]
    B,
    #[serde(rename = "C")]
    C,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "F")]
    F,
}

impl Grade {
    pub fn as_str(self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::AMinus => "A-",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    pub min_percentage: f64,
    pub max_percentage: f64,
    pub grade: Grade,
    pub grade_point: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GradePoint {
    pub grade: Grade,
    pub gpa: f64,
}

impl GradePoint {
    pub const FAIL: GradePoint = GradePoint {
        grade: Grade::F,
        gpa: 0.0,
    };
}

/// The one grading table used for subjects, groups and final GPA mapping.
/// Bands are ordered highest first and cover [0, 100] without gaps.
pub const GRADE_SCALE: [GradeBand; 7] = [
    GradeBand {
        min_percentage: 80.0,
        max_percentage: 100.0,
        grade: Grade::APlus,
        grade_point: 5.0,
    },
    GradeBand {
        min_percentage: 70.0,
        max_percentage: 80.0,
        grade: Grade::A,
        grade_point: 4.0,
    },
    GradeBand {
        min_percentage: 60.0,
        max_percentage: 70.0,
        grade: Grade::AMinus,
        grade_point: 3.5,
    },
    GradeBand {
        min_percentage: 50.0,
        max_percentage: 60.0,
        grade: Grade::B,
        grade_point: 3.0,
    },
    GradeBand {
        min_percentage: 40.0,
        max_percentage: 50.0,
        grade: Grade::C,
        grade_point: 2.0,
    },
    GradeBand {
        min_percentage: 33.0,
        max_percentage: 40.0,
        grade: Grade::D,
        grade_point: 1.0,
    },
    GradeBand {
        min_percentage: 0.0,
        max_percentage: 33.0,
        grade: Grade::F,
        grade_point: 0.0,
    },
];

pub fn grade_for_percentage(percentage: f64) -> GradePoint {
    for band in GRADE_SCALE.iter() {
        // Lower bounds are inclusive; anything under the last band is F.
        if band.grade != Grade::F && percentage >= band.min_percentage {
            return GradePoint {
                grade: band.grade,
                gpa: band.grade_point,
            };
        }
    }
    GradePoint::FAIL
}

/// Grade `obtained` out of `max`. A non-positive `max` cannot be graded and
/// yields F; callers skip such subjects before getting here.
pub fn resolve_grade(obtained: f64, max: f64) -> GradePoint {
    if max <= 0.0 || !obtained.is_finite() {
        return GradePoint::FAIL;
    }
    grade_for_percentage(obtained / max * 100.0)
}

/// Map a final GPA back to a letter using the same table's grade points.
pub fn grade_for_gpa(gpa: f64) -> Grade {
    GRADE_SCALE
        .iter()
        .find(|band| band.grade != Grade::F && gpa >= band.grade_point)
        .map(|band| band.grade)
        .unwrap_or(Grade::F)
}

/// Round half away from zero to 2 decimals.
pub fn round_2_decimal(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
