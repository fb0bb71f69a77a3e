use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::RemoteService;
use crate::error::{ValidationError, WorkflowError};
use crate::models::{
    BirthProfile, CalendarSystem, EphemeralIdentity, NavigationPayload, PartnerForm, SelfProfile,
    Sex, StoredProfile, DEFAULT_BIRTH_PLACE, DEFAULT_COUNTERPART_NAME, DEFAULT_SELF_NAME,
};
use crate::presence::PresenceTimer;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Submitting,
    /// Success was handed off; the instance accepts no further submissions.
    Retired,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Navigate(NavigationPayload),
    /// Another submission was in flight, or the coordinator already retired.
    Ignored,
}

/// Runs the compatibility request for one screen visit.
pub struct Coordinator<'a> {
    service: &'a dyn RemoteService,
    presence: &'a PresenceTimer,
    session: &'a Session,
    state: Mutex<CoordinatorState>,
}

impl<'a> Coordinator<'a> {
    pub fn new(
        service: &'a dyn RemoteService,
        presence: &'a PresenceTimer,
        session: &'a Session,
    ) -> Self {
        Self {
            service,
            presence,
            session,
            state: Mutex::new(CoordinatorState::Idle),
        }
    }

    pub fn state(&self) -> CoordinatorState {
        *self.lock()
    }

    fn begin(&self) -> bool {
        let mut state = self.lock();
        if *state != CoordinatorState::Idle {
            return false;
        }
        *state = CoordinatorState::Submitting;
        true
    }

    fn finish_ok(&self) {
        let mut state = self.lock();
        debug_assert_eq!(*state, CoordinatorState::Submitting);
        *state = CoordinatorState::Retired;
    }

    fn finish_err(&self) {
        let mut state = self.lock();
        debug_assert_eq!(*state, CoordinatorState::Submitting);
        *state = CoordinatorState::Idle;
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn submit(
        &self,
        form: &PartnerForm,
        cached_self: Option<BirthProfile>,
    ) -> Result<SubmitOutcome, WorkflowError> {
        if !self.begin() {
            info!("submission ignored: coordinator is {:?}", self.state());
            return Ok(SubmitOutcome::Ignored);
        }
        self.presence.set_requested_open(true);

        let result = self.run(form, cached_self).await;

        self.presence.set_requested_open(false);
        match result {
            Ok(payload) => {
                self.finish_ok();
                Ok(SubmitOutcome::Navigate(payload))
            }
            Err(err) => {
                warn!("compatibility request failed: {}", err);
                self.finish_err();
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        form: &PartnerForm,
        cached_self: Option<BirthProfile>,
    ) -> Result<NavigationPayload, WorkflowError> {
        let counterpart = parse_partner_form(form)?;
        let identity = ephemeral_identity(&counterpart.display_name);

        info!(email = %identity.email, "registering counterpart entity");
        let registration = self.service.register_entity(&identity, &counterpart).await?;
        let entity_id = registration.entity_id().ok_or_else(|| {
            WorkflowError::Protocol("registration returned no identifier".to_string())
        })?;

        info!(entity_id = %entity_id, "computing compatibility");
        let compatibility = self.service.compute_compatibility(&entity_id).await?;

        let self_profile = self.resolve_self_profile(cached_self).await;

        Ok(NavigationPayload {
            compatibility,
            self_profile,
            counterpart_profile: counterpart,
        })
    }

    /// Never fails: degrades to a partial profile keeping whatever was fetched.
    async fn resolve_self_profile(&self, cached_self: Option<BirthProfile>) -> SelfProfile {
        if let Some(profile) = cached_self {
            return SelfProfile::Full(profile);
        }

        let stored = match self.service.fetch_own_profile().await {
            Ok(stored) => stored,
            Err(err) => {
                warn!("own profile unavailable, using cached name: {}", err);
                StoredProfile::default()
            }
        };
        let display_name = self
            .session
            .display_name()
            .or(stored.display_name.as_deref().filter(|n| !n.trim().is_empty()))
            .unwrap_or(DEFAULT_SELF_NAME)
            .to_string();

        match stored.into_full(display_name.clone()) {
            Ok(profile) => SelfProfile::Full(profile),
            Err(stored) => {
                info!("stored profile incomplete, continuing with a partial self profile");
                SelfProfile::Partial {
                    display_name,
                    sex: stored.sex,
                    calendar_system: stored.calendar_system,
                    birth_place: stored.birth_place,
                }
            }
        }
    }
}

pub fn parse_partner_form(form: &PartnerForm) -> Result<BirthProfile, ValidationError> {
    let sex = match form.gender.trim() {
        "male" => Sex::Male,
        "female" => Sex::Female,
        other => return Err(ValidationError::Gender(other.to_string())),
    };
    let calendar_system = match form.calendar.trim() {
        "solar" => CalendarSystem::Solar,
        "lunar" => CalendarSystem::Lunar,
        other => return Err(ValidationError::Calendar(other.to_string())),
    };
    let birth_date = NaiveDate::parse_from_str(form.birth_date.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::BirthDate(form.birth_date.clone()))?;
    let birth_time = match form.birth_time.trim() {
        "" => None,
        text => Some(
            NaiveTime::parse_from_str(text, "%H:%M")
                .map_err(|_| ValidationError::BirthTime(form.birth_time.clone()))?,
        ),
    };

    Ok(BirthProfile {
        display_name: non_empty_or(&form.user_name, DEFAULT_COUNTERPART_NAME),
        sex,
        calendar_system,
        birth_date,
        birth_time,
        birth_place: non_empty_or(&form.birth_city, DEFAULT_BIRTH_PLACE),
    })
}

fn non_empty_or(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Unique per call: millisecond timestamp plus a random suffix.
pub fn ephemeral_identity(name: &str) -> EphemeralIdentity {
    let suffix: String = Uuid::new_v4().simple().to_string().chars().take(9).collect();
    EphemeralIdentity {
        email: format!("temp_{}_{}@temp.com", Utc::now().timestamp_millis(), suffix),
        password: Uuid::new_v4().simple().to_string(),
        name: name.to_string(),
    }
}
