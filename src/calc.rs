use chrono::NaiveDate;
use std::cmp::Ordering;

/// One-decimal rounding used everywhere a percent is shown to the UI.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

pub fn percent(obtained: f64, max: f64) -> f64 {
    if max > 0.0 {
        100.0 * obtained / max
    } else {
        0.0
    }
}

/// Grade bands used across the results pages:
/// 90+ A+, 80+ A, 70+ B+, 60+ B, 50+ C, below F.
pub fn grade_for_percent(p: f64) -> &'static str {
    if p >= 90.0 {
        "A+"
    } else if p >= 80.0 {
        "A"
    } else if p >= 70.0 {
        "B+"
    } else if p >= 60.0 {
        "B"
    } else if p >= 50.0 {
        "C"
    } else {
        "F"
    }
}

/// 10-point scale for the band a percent falls in.
pub fn grade_point(p: f64) -> f64 {
    match grade_for_percent(p) {
        "A+" => 10.0,
        "A" => 9.0,
        "B+" => 8.0,
        "B" => 7.0,
        "C" => 6.0,
        _ => 0.0,
    }
}

/// Leave duration counts both endpoints: 2025-03-15..2025-03-17 is 3 days.
pub fn leave_days_inclusive(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days() + 1
}

pub fn attendance_percent(attended: i64, held: i64) -> f64 {
    if held > 0 {
        100.0 * (attended as f64) / (held as f64)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl LeaveStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveStatus::Pending => "Pending",
            LeaveStatus::Approved => "Approved",
            LeaveStatus::Rejected => "Rejected",
            LeaveStatus::Cancelled => "Cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(LeaveStatus::Pending),
            "Approved" => Some(LeaveStatus::Approved),
            "Rejected" => Some(LeaveStatus::Rejected),
            "Cancelled" => Some(LeaveStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveAction {
    Approve,
    Reject,
    Cancel,
}

impl LeaveAction {
    pub fn target(self) -> LeaveStatus {
        match self {
            LeaveAction::Approve => LeaveStatus::Approved,
            LeaveAction::Reject => LeaveStatus::Rejected,
            LeaveAction::Cancel => LeaveStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Pending request moves to the action's target status.
    Applied,
    /// The request already carries this decision; nothing to write.
    NoChange,
    /// Settled request, conflicting action.
    Invalid,
}

/// Pending -> {Approved, Rejected} by an approver, Pending -> Cancelled by
/// the applicant. Settled statuses are terminal; repeating the decision a
/// request already carries is a no-op.
pub fn leave_transition(current: LeaveStatus, action: LeaveAction) -> Transition {
    match current {
        LeaveStatus::Pending => Transition::Applied,
        settled if settled == action.target() => Transition::NoChange,
        _ => Transition::Invalid,
    }
}

/// Certificate review shares the transition rules but spells its statuses
/// lowercase, as the browser edition always did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

pub fn review_transition(current: ReviewStatus, approve: bool) -> Transition {
    let target = if approve {
        ReviewStatus::Approved
    } else {
        ReviewStatus::Rejected
    };
    match current {
        ReviewStatus::Pending => Transition::Applied,
        settled if settled == target => Transition::NoChange,
        _ => Transition::Invalid,
    }
}

/// One counsellor/coordinator slot as seen by the allocator: identity for
/// deterministic tie-breaks plus its current load and ceiling.
#[derive(Debug, Clone)]
pub struct SlotLoad {
    pub slot_id: String,
    pub faculty_id: String,
    pub faculty_name: String,
    pub assigned: i64,
    pub max_students: i64,
}

#[derive(Debug, Clone)]
pub enum AutoAssignPlan {
    Placements(Vec<(String, String)>),
    /// Every slot filled up with this many students left over.
    CapacityExceeded { unplaced: usize },
}

/// Least-loaded greedy distribution. Students arrive in hall-ticket order;
/// each goes to the slot with the fewest assigned that still has room, ties
/// by faculty name then faculty id. Loads end up within 1 of each other
/// whenever the ceilings are not binding.
pub fn plan_auto_assign(student_ids: &[String], slots: &mut [SlotLoad]) -> AutoAssignPlan {
    let mut placements: Vec<(String, String)> = Vec::with_capacity(student_ids.len());

    for (i, student_id) in student_ids.iter().enumerate() {
        let target = slots
            .iter_mut()
            .filter(|s| s.assigned < s.max_students)
            .min_by(|a, b| {
                a.assigned
                    .cmp(&b.assigned)
                    .then_with(|| a.faculty_name.cmp(&b.faculty_name))
                    .then_with(|| a.faculty_id.cmp(&b.faculty_id))
            });
        match target {
            Some(slot) => {
                slot.assigned += 1;
                placements.push((student_id.clone(), slot.slot_id.clone()));
            }
            None => {
                return AutoAssignPlan::CapacityExceeded {
                    unplaced: student_ids.len() - i,
                };
            }
        }
    }

    AutoAssignPlan::Placements(placements)
}

/// Class-summary ordering: percent descending, then hall ticket.
pub fn rank_order(a: (f64, &str), b: (f64, &str)) -> Ordering {
    b.0.partial_cmp(&a.0)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.1.cmp(b.1))
}
