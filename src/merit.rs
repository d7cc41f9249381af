use crate::calc::StudentResult;
use std::cmp::Ordering;

fn merit_order(a: &StudentResult, b: &StudentResult) -> Ordering {
    b.final_gpa
        .total_cmp(&a.final_gpa)
        .then_with(|| b.total_marks.total_cmp(&a.total_marks))
}

/// Sort by final GPA then total marks, both descending, and number the list
/// 1..n. Full ties keep input order and still get distinct positions.
pub fn rank_results(results: &mut [StudentResult]) {
    // sort_by is stable.
    results.sort_by(merit_order);
    for (i, r) in results.iter_mut().enumerate() {
        r.merit_position = i + 1;
    }
}
