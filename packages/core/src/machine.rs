//! Campaign state machine.
//!
//! A campaign walks `CREATED -> FETCHING_LEADS -> VERIFYING_EMAILS ->
//! ENRICHING_LEADS -> GENERATING_EMAILS -> COMPLETED`, and may drop to `FAILED`
//! from any non-terminal state. The only way to change a campaign's status is
//! [`advance`], which folds one [`StageJobEvent`] into the campaign.
//!
//! Events may be redelivered or arrive out of order. `advance` therefore
//! compares the event's job id and stage against `job_ids` and the current
//! status instead of trusting arrival order:
//!
//! - an event already reflected in the campaign is [`Advance::AlreadyApplied`];
//! - an event for a stage behind the active one is [`Advance::Discarded`];
//! - an event for a stage ahead of the active one is [`Advance::Rejected`].

use serde::{Deserialize, Serialize};

use crate::{Campaign, CampaignId, CampaignStatus, JobId, JobStatus, JobType, Stage, StageJobEvent};

/// Fallback `status_error` when a failing job carried no message.
pub const UNSPECIFIED_FAILURE: &str = "stage job failed without an error message";
/// Fallback `status_error` when a job was cancelled without a reason.
pub const CANCELLED_FAILURE: &str = "stage job was cancelled";

/// Why an event was dropped without changing the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// The job type does not belong to a pipeline stage.
    NotAPipelineStage,
    /// The event is for a stage the campaign has already moved past.
    StaleStage,
    /// The campaign has already finished.
    CampaignTerminal,
}

/// An event that contradicts what the job tracker guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum InvariantViolation {
    #[error("event for campaign {got} delivered to campaign {expected}")]
    WrongCampaign {
        expected: CampaignId,
        got: CampaignId,
    },

    #[error("event for stage {got} while the campaign expects {expected}")]
    StageAhead { expected: Stage, got: Stage },

    #[error("job {got} reported for stage {stage}, which is owned by job {recorded}")]
    ConflictingJob {
        stage: Stage,
        recorded: JobId,
        got: JobId,
    },
}

/// What [`advance`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Advance {
    /// The campaign changed. `from == to` when only `job_ids` changed.
    Applied {
        from: CampaignStatus,
        to: CampaignStatus,
    },
    /// The event is already reflected in the campaign.
    AlreadyApplied,
    /// The event is irrelevant to the campaign and was dropped.
    Discarded(DiscardReason),
    /// The event violates pipeline ordering and was refused.
    Rejected(InvariantViolation),
}

impl Advance {
    /// Whether the campaign was modified.
    pub fn is_applied(&self) -> bool {
        matches!(self, Advance::Applied { .. })
    }

    /// Whether the status itself changed.
    pub fn status_changed(&self) -> bool {
        matches!(self, Advance::Applied { from, to } if from != to)
    }
}

/// Fold one stage job event into `campaign`, returning the next campaign state
/// and what happened. The input is never modified; replaying the same events
/// in the same order always produces the same campaign.
pub fn advance(campaign: &Campaign, event: &StageJobEvent) -> (Campaign, Advance) {
    let outcome = evaluate(campaign, event);
    let next = match &outcome {
        Advance::Applied { to, .. } => {
            let mut next = campaign.clone();
            // The event's stage is known here: `evaluate` only applies pipeline jobs.
            if let Some(stage) = event.job_type.stage() {
                next.job_ids.insert(stage, event.job_id);
            }
            next.status = *to;
            if *to == CampaignStatus::Failed {
                next.status_error = Some(failure_message(event));
            }
            if event.occurred_at > next.updated_at {
                next.updated_at = event.occurred_at;
            }
            next
        }
        _ => campaign.clone(),
    };
    (next, outcome)
}

fn evaluate(campaign: &Campaign, event: &StageJobEvent) -> Advance {
    let Some(stage) = event.job_type.stage() else {
        return Advance::Discarded(DiscardReason::NotAPipelineStage);
    };

    if event.campaign_id != campaign.id {
        return Advance::Rejected(InvariantViolation::WrongCampaign {
            expected: campaign.id,
            got: event.campaign_id,
        });
    }

    let recorded = campaign.job_for(stage);

    let Some(active) = campaign.active_stage() else {
        return if recorded == Some(event.job_id) {
            Advance::AlreadyApplied
        } else {
            Advance::Discarded(DiscardReason::CampaignTerminal)
        };
    };

    if stage < active {
        return if recorded == Some(event.job_id) {
            Advance::AlreadyApplied
        } else {
            Advance::Discarded(DiscardReason::StaleStage)
        };
    }

    if stage > active {
        return Advance::Rejected(InvariantViolation::StageAhead {
            expected: active,
            got: stage,
        });
    }

    if let Some(recorded) = recorded
        && recorded != event.job_id
    {
        return Advance::Rejected(InvariantViolation::ConflictingJob {
            stage,
            recorded,
            got: event.job_id,
        });
    }

    let from = campaign.status;
    let to = match event.status {
        JobStatus::Pending | JobStatus::Processing | JobStatus::Paused => {
            CampaignStatus::for_stage(stage)
        }
        JobStatus::Completed => stage
            .next()
            .map_or(CampaignStatus::Completed, CampaignStatus::for_stage),
        JobStatus::Failed | JobStatus::Cancelled => CampaignStatus::Failed,
    };

    if from == to && recorded.is_some() {
        return Advance::AlreadyApplied;
    }

    Advance::Applied { from, to }
}

fn failure_message(event: &StageJobEvent) -> String {
    match (&event.error, event.status) {
        (Some(error), _) => error.clone(),
        (None, JobStatus::Cancelled) => CANCELLED_FAILURE.to_string(),
        (None, _) => UNSPECIFIED_FAILURE.to_string(),
    }
}

/// The job type the campaign needs next, or `None` once it is terminal.
pub fn next_job_type(campaign: &Campaign) -> Option<JobType> {
    campaign.active_stage().map(JobType::for_stage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    fn event(campaign: &Campaign, job_id: JobId, job_type: JobType, status: JobStatus) -> StageJobEvent {
        StageJobEvent {
            job_id,
            campaign_id: campaign.id,
            job_type,
            status,
            error: None,
            occurred_at: campaign.created_at + Duration::seconds(1),
        }
    }

    fn completed(campaign: &Campaign, stage: Stage) -> StageJobEvent {
        event(campaign, JobId::new(), JobType::for_stage(stage), JobStatus::Completed)
    }

    /// Apply every stage's completion in pipeline order.
    fn run_to_completion(mut campaign: Campaign) -> Campaign {
        for stage in Stage::ALL {
            let (next, outcome) = advance(&campaign, &completed(&campaign, stage));
            assert!(outcome.is_applied(), "{stage}: {outcome:?}");
            campaign = next;
        }
        campaign
    }

    #[test]
    fn completed_fetch_moves_to_verifying() {
        let campaign = Campaign::new("q3 outreach");
        let (next, outcome) = advance(&campaign, &completed(&campaign, Stage::FetchLeads));

        assert_eq!(
            outcome,
            Advance::Applied {
                from: CampaignStatus::Created,
                to: CampaignStatus::VerifyingEmails,
            }
        );
        assert_eq!(next.status, CampaignStatus::VerifyingEmails);
        assert!(next.job_for(Stage::FetchLeads).is_some());
        assert_eq!(campaign.status, CampaignStatus::Created, "input is untouched");
    }

    #[test]
    fn pending_job_starts_first_stage() {
        let campaign = Campaign::new("q3 outreach");
        let job_id = JobId::new();
        let (next, outcome) = advance(
            &campaign,
            &event(&campaign, job_id, JobType::FetchLeads, JobStatus::Pending),
        );
        assert!(outcome.status_changed());
        assert_eq!(next.status, CampaignStatus::FetchingLeads);
        assert_eq!(next.job_for(Stage::FetchLeads), Some(job_id));

        // Processing for the same job changes nothing further.
        let (again, outcome) = advance(
            &next,
            &event(&next, job_id, JobType::FetchLeads, JobStatus::Processing),
        );
        assert_eq!(outcome, Advance::AlreadyApplied);
        assert_eq!(again, next);
    }

    #[test]
    fn non_terminal_event_registers_job_for_current_stage() {
        let campaign = run_to_stage(Stage::EnrichLeads);
        let job_id = JobId::new();
        let (next, outcome) = advance(
            &campaign,
            &event(&campaign, job_id, JobType::EnrichLead, JobStatus::Processing),
        );
        assert_eq!(
            outcome,
            Advance::Applied {
                from: CampaignStatus::EnrichingLeads,
                to: CampaignStatus::EnrichingLeads,
            }
        );
        assert_eq!(next.job_for(Stage::EnrichLeads), Some(job_id));
    }

    #[test]
    fn all_stages_completed_in_order_completes_campaign() {
        let campaign = run_to_completion(Campaign::new("launch"));
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.job_ids.len(), Stage::ALL.len());
        assert!(campaign.status_error.is_none());
    }

    #[test]
    fn failed_stage_fails_campaign_with_job_error() {
        let campaign = run_to_stage(Stage::VerifyEmails);
        let mut failure = event(&campaign, JobId::new(), JobType::VerifyEmails, JobStatus::Failed);
        failure.error = Some("mailbox provider rejected batch".into());

        let (next, outcome) = advance(&campaign, &failure);
        assert_eq!(
            outcome,
            Advance::Applied {
                from: CampaignStatus::VerifyingEmails,
                to: CampaignStatus::Failed,
            }
        );
        assert_eq!(next.status_error.as_deref(), Some("mailbox provider rejected batch"));
    }

    #[test]
    fn cancelled_stage_fails_campaign_with_default_message() {
        let campaign = Campaign::new("launch");
        let cancel = event(&campaign, JobId::new(), JobType::FetchLeads, JobStatus::Cancelled);
        let (next, _) = advance(&campaign, &cancel);
        assert_eq!(next.status, CampaignStatus::Failed);
        assert_eq!(next.status_error.as_deref(), Some(CANCELLED_FAILURE));
    }

    #[test]
    fn redelivered_completion_is_a_noop() {
        let campaign = Campaign::new("launch");
        let done = completed(&campaign, Stage::FetchLeads);
        let (once, _) = advance(&campaign, &done);
        let (twice, outcome) = advance(&once, &done);
        assert_eq!(outcome, Advance::AlreadyApplied);
        assert_eq!(once, twice);
    }

    #[test]
    fn redelivered_failure_on_failed_campaign_is_a_noop() {
        let campaign = Campaign::new("launch");
        let mut failure = event(&campaign, JobId::new(), JobType::FetchLeads, JobStatus::Failed);
        failure.error = Some("quota".into());
        let (failed, _) = advance(&campaign, &failure);
        let (again, outcome) = advance(&failed, &failure);
        assert_eq!(outcome, Advance::AlreadyApplied);
        assert_eq!(again, failed);
    }

    #[test]
    fn stage_ahead_is_rejected_as_violation() {
        let campaign = run_to_stage(Stage::VerifyEmails);
        let enrich = completed(&campaign, Stage::EnrichLeads);
        let (next, outcome) = advance(&campaign, &enrich);
        assert_eq!(
            outcome,
            Advance::Rejected(InvariantViolation::StageAhead {
                expected: Stage::VerifyEmails,
                got: Stage::EnrichLeads,
            })
        );
        assert_eq!(next, campaign);
    }

    #[test]
    fn stale_event_from_unknown_job_is_discarded() {
        let campaign = run_to_stage(Stage::GenerateEmails);
        let late = event(&campaign, JobId::new(), JobType::FetchLeads, JobStatus::Failed);
        let (next, outcome) = advance(&campaign, &late);
        assert_eq!(outcome, Advance::Discarded(DiscardReason::StaleStage));
        assert_eq!(next, campaign);
    }

    #[test]
    fn second_job_for_active_stage_is_rejected() {
        let campaign = Campaign::new("launch");
        let first = event(&campaign, JobId::new(), JobType::FetchLeads, JobStatus::Processing);
        let (running, _) = advance(&campaign, &first);

        let intruder = completed(&running, Stage::FetchLeads);
        let (next, outcome) = advance(&running, &intruder);
        assert!(matches!(
            outcome,
            Advance::Rejected(InvariantViolation::ConflictingJob { stage: Stage::FetchLeads, .. })
        ));
        assert_eq!(next, running);
    }

    #[test]
    fn event_for_other_campaign_is_rejected() {
        let campaign = Campaign::new("launch");
        let other = Campaign::new("other");
        let stray = completed(&other, Stage::FetchLeads);
        let (_, outcome) = advance(&campaign, &stray);
        assert!(matches!(
            outcome,
            Advance::Rejected(InvariantViolation::WrongCampaign { .. })
        ));
    }

    #[test]
    fn cleanup_jobs_never_move_the_campaign() {
        let campaign = Campaign::new("launch");
        let cleanup = event(&campaign, JobId::new(), JobType::CleanupCampaign, JobStatus::Completed);
        let (next, outcome) = advance(&campaign, &cleanup);
        assert_eq!(outcome, Advance::Discarded(DiscardReason::NotAPipelineStage));
        assert_eq!(next, campaign);
    }

    #[test]
    fn events_after_completion_are_discarded() {
        let campaign = run_to_completion(Campaign::new("launch"));
        let stray = completed(&campaign, Stage::GenerateEmails);
        let (next, outcome) = advance(&campaign, &stray);
        assert_eq!(outcome, Advance::Discarded(DiscardReason::CampaignTerminal));
        assert_eq!(next, campaign);
    }

    #[test]
    fn updated_at_follows_event_time() {
        let campaign = Campaign::new("launch");
        let mut done = completed(&campaign, Stage::FetchLeads);
        done.occurred_at = Utc::now() + Duration::minutes(5);
        let (next, _) = advance(&campaign, &done);
        assert_eq!(next.updated_at, done.occurred_at);
    }

    #[test]
    fn next_job_type_follows_status() {
        let campaign = Campaign::new("launch");
        assert_eq!(next_job_type(&campaign), Some(JobType::FetchLeads));
        let campaign = run_to_stage(Stage::EnrichLeads);
        assert_eq!(next_job_type(&campaign), Some(JobType::EnrichLead));
        let campaign = run_to_completion(Campaign::new("launch"));
        assert_eq!(next_job_type(&campaign), None);
    }

    /// A campaign whose active stage is `stage`, reached by completing every
    /// earlier stage.
    fn run_to_stage(stage: Stage) -> Campaign {
        let mut campaign = Campaign::new("fixture");
        for earlier in Stage::ALL.into_iter().take_while(|s| *s < stage) {
            campaign = advance(&campaign, &completed(&campaign, earlier)).0;
        }
        campaign
    }

    fn arb_status() -> impl Strategy<Value = JobStatus> {
        prop_oneof![
            Just(JobStatus::Pending),
            Just(JobStatus::Processing),
            Just(JobStatus::Paused),
            Just(JobStatus::Completed),
            Just(JobStatus::Failed),
            Just(JobStatus::Cancelled),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a campaign completes iff every stage completed in order; the
        /// first failing stage fails it with that job's error.
        #[test]
        fn final_status_follows_stage_outcomes(
            outcomes in prop::collection::vec(arb_status(), 1..=4)
        ) {
            let mut campaign = Campaign::new("prop");
            let mut expected_failure = None;

            for (stage, status) in Stage::ALL.into_iter().zip(outcomes.iter().copied()) {
                let mut ev = event(&campaign, JobId::new(), JobType::for_stage(stage), status);
                if matches!(status, JobStatus::Failed | JobStatus::Cancelled) {
                    ev.error = Some(format!("{stage} broke"));
                }
                campaign = advance(&campaign, &ev).0;

                if campaign.status == CampaignStatus::Failed {
                    expected_failure = ev.error.clone();
                    break;
                }
                if !matches!(status, JobStatus::Completed) {
                    break;
                }
            }

            let all_completed = outcomes.len() == Stage::ALL.len()
                && outcomes.iter().all(|s| *s == JobStatus::Completed);
            prop_assert_eq!(campaign.status == CampaignStatus::Completed, all_completed);
            if campaign.status == CampaignStatus::Failed {
                prop_assert_eq!(campaign.status_error, expected_failure);
            }
        }

        /// Property: replaying any event a second time never changes the campaign.
        #[test]
        fn replaying_events_is_idempotent(
            outcomes in prop::collection::vec(arb_status(), 1..=4)
        ) {
            let mut campaign = Campaign::new("prop");
            for (stage, status) in Stage::ALL.into_iter().zip(outcomes) {
                let ev = event(&campaign, JobId::new(), JobType::for_stage(stage), status);
                let (once, first) = advance(&campaign, &ev);
                let (twice, second) = advance(&once, &ev);
                prop_assert_eq!(&once, &twice);
                prop_assert!(!second.is_applied(), "{:?} then {:?}", first, second);
                campaign = once;
            }
        }
    }
}
