//! Registration and token issuance.
//!
//! Every check that can reject a registration runs before anything is
//! written. Media is uploaded next, and only then is a row inserted, so a
//! failed upload never leaves a registration behind. Tokens are allocated as
//! `max(token) + 1` inside an immediate (write-locking) transaction, which
//! also re-checks for duplicates; the unique indexes on `registrations` back
//! this up, and a conflict is retried a bounded number of times.

use chrono::Utc;
use diesel::{
    dsl::max,
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use uuid::Uuid;

use crate::{
    events::Event,
    gate::GateState,
    media::{self, MediaError, MediaKind, Upload},
    registrations::Registration,
    schema::registrations,
    storage::ObjectStore,
    students::Student,
    validation::clean_roster,
};

const MAX_ATTEMPTS: usize = 3;

pub const MIN_TEAM_SIZE: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    Individual,
    Team {
        team_name: String,
        members: Vec<String>,
    },
}

#[derive(Debug, Clone)]
pub struct RegistrationForm {
    pub entry: Entry,
    pub description: Option<String>,
    pub audio: Option<Upload>,
    pub video: Option<Upload>,
}

impl RegistrationForm {
    fn file(&self, kind: MediaKind) -> Option<&Upload> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }
}

/// A successful registration. `fresh` is false when the student (or their
/// team) was already registered and the existing token is being shown
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registered {
    pub token: i64,
    pub fresh: bool,
}

impl Registered {
    fn existing(registration: &Registration) -> Self {
        Self {
            token: registration.token,
            fresh: false,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Audio file is required for this event.")]
    AudioRequired,
    #[error("Video file is required for this event.")]
    VideoRequired,
    #[error("Minimum 2 team members are required.")]
    TeamTooSmall,
    #[error("Maximum team size is {max}.")]
    TeamTooLarge { max: i64 },
    #[error("Please enter a team name.")]
    MissingTeamName,
    #[error("That team name is already taken for this event.")]
    TeamNameTaken,
    #[error("{}", flow_message(.team_event))]
    WrongFlow { team_event: bool },
    #[error("Registrations for this event are closed.")]
    RegistrationClosed,
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("Too many people are registering right now. Please try again.")]
    Contended,
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

fn flow_message(team_event: &bool) -> &'static str {
    if *team_event {
        "This is a team event; please register as a team."
    } else {
        "This is an individual event; please register on your own."
    }
}

impl LedgerError {
    /// Whether the student can fix this by changing what they submitted.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            LedgerError::Database(_)
                | LedgerError::Contended
                | LedgerError::Media(MediaError::Upload { .. })
        )
    }
}

/// Trims the roster, drops blank entries and checks its size is within
/// `[2, max]`.
pub fn validate_roster(
    members: &[String],
    max: i64,
) -> Result<Vec<String>, LedgerError> {
    let roster = clean_roster(members);
    if roster.len() < MIN_TEAM_SIZE {
        return Err(LedgerError::TeamTooSmall);
    }
    if roster.len() as i64 > max {
        return Err(LedgerError::TeamTooLarge { max });
    }
    Ok(roster)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Registers `student` for `event`.
#[tracing::instrument(skip_all, fields(event = %event.id, student = %student.id))]
pub async fn register(
    conn: &mut SqliteConnection,
    store: &dyn ObjectStore,
    gate: GateState,
    event: &Event,
    student: &Student,
    form: RegistrationForm,
) -> Result<Registered, LedgerError> {
    let required: Vec<MediaKind> = MediaKind::ALL
        .into_iter()
        .filter(|kind| match kind {
            MediaKind::Audio => event.audio,
            MediaKind::Video => event.video,
        })
        .collect();

    for &kind in &required {
        match form.file(kind) {
            None if kind == MediaKind::Audio => {
                return Err(LedgerError::AudioRequired);
            }
            None => return Err(LedgerError::VideoRequired),
            Some(file) => media::check_size(kind, file)?,
        }
    }

    if let Some(existing) =
        Registration::by_identity(&event.id, &student.email, conn)?
    {
        tracing::debug!("already registered with token {}", existing.token);
        return Ok(Registered::existing(&existing));
    }

    let (name, team_name) = match &form.entry {
        Entry::Team { team_name, members } => {
            let team_name = team_name.trim();
            if !team_name.is_empty() {
                if let Some(existing) =
                    Registration::by_team_name(&event.id, team_name, conn)?
                {
                    tracing::debug!(
                        "team {team_name:?} already registered with token {}",
                        existing.token
                    );
                    return Ok(Registered::existing(&existing));
                }
            }

            if !event.team_event {
                return Err(LedgerError::WrongFlow { team_event: false });
            }
            let roster = validate_roster(members, event.team_size)?;
            if team_name.is_empty() {
                return Err(LedgerError::MissingTeamName);
            }
            (roster.join(", "), Some(team_name.to_string()))
        }
        Entry::Individual => {
            if event.team_event {
                return Err(LedgerError::WrongFlow { team_event: true });
            }
            (student.name.clone(), None)
        }
    };

    if !gate.registrations_open() || !event.registration_open {
        return Err(LedgerError::RegistrationClosed);
    }

    for &kind in &required {
        if let Some(file) = form.file(kind) {
            media::upload(store, kind, &event.id, &student.id, file).await?;
        }
    }

    allocate(
        conn,
        event,
        student,
        &name,
        team_name.as_deref(),
        non_empty(form.description.as_deref()).as_deref(),
    )
}

/// Inserts the registration with the next token for the event. Must not be
/// called from inside another transaction.
fn allocate(
    conn: &mut SqliteConnection,
    event: &Event,
    student: &Student,
    name: &str,
    team_name: Option<&str>,
    description: Option<&str>,
) -> Result<Registered, LedgerError> {
    for attempt in 1..=MAX_ATTEMPTS {
        let ret = conn.immediate_transaction(|conn| {
            if let Some(existing) =
                Registration::by_identity(&event.id, &student.email, conn)?
            {
                return Ok(Registered::existing(&existing));
            }
            if let Some(team_name) = team_name {
                if let Some(existing) =
                    Registration::by_team_name(&event.id, team_name, conn)?
                {
                    return Ok(Registered::existing(&existing));
                }
            }

            let top: Option<i64> = registrations::table
                .filter(registrations::event_id.eq(&event.id))
                .select(max(registrations::token))
                .first(conn)?;
            let token = top.unwrap_or(0) + 1;

            diesel::insert_into(registrations::table)
                .values((
                    registrations::id.eq(Uuid::now_v7().to_string()),
                    registrations::event_id.eq(&event.id),
                    registrations::student_id.eq(&student.id),
                    registrations::token.eq(token),
                    registrations::name.eq(name),
                    registrations::email.eq(&student.email),
                    registrations::team_name.eq(team_name),
                    registrations::description.eq(description),
                    registrations::created_at.eq(Utc::now().naive_utc()),
                ))
                .execute(conn)?;

            Ok::<_, DieselError>(Registered { token, fresh: true })
        });

        match ret {
            Ok(registered) => {
                if registered.fresh {
                    tracing::info!("issued token {}", registered.token);
                }
                return Ok(registered);
            }
            Err(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                _,
            )) => {
                tracing::warn!("token allocation conflict (attempt {attempt})");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(LedgerError::Contended)
}

/// New details for an existing registration, from the overview page.
#[derive(Debug, Clone)]
pub struct DetailsUpdate {
    pub description: Option<String>,
    /// Only applied to team events.
    pub team: Option<(String, Vec<String>)>,
}

/// Updates the description (and, for team events, the team name and
/// roster) of the student's registration for `event`.
#[tracing::instrument(skip_all, fields(event = %event.id, student = %student_id))]
pub fn update_details(
    conn: &mut SqliteConnection,
    event: &Event,
    student_id: &str,
    update: DetailsUpdate,
) -> Result<Registration, LedgerError> {
    let registration = Registration::by_student(student_id, &event.id, conn)?;
    let description = non_empty(update.description.as_deref());

    let team = match (&update.team, event.team_event) {
        (Some((team_name, members)), true) => {
            let team_name = team_name.trim();
            if team_name.is_empty() {
                return Err(LedgerError::MissingTeamName);
            }
            let roster = validate_roster(members, event.team_size)?;
            if let Some(other) =
                Registration::by_team_name(&event.id, team_name, conn)?
            {
                if other.id != registration.id {
                    return Err(LedgerError::TeamNameTaken);
                }
            }
            Some((team_name.to_string(), roster.join(", ")))
        }
        _ => None,
    };

    let target = registrations::table
        .filter(registrations::id.eq(&registration.id));
    let ret = match &team {
        Some((team_name, name)) => diesel::update(target)
            .set((
                registrations::description.eq(&description),
                registrations::team_name.eq(team_name),
                registrations::name.eq(name),
            ))
            .execute(conn),
        None => diesel::update(target)
            .set(registrations::description.eq(&description))
            .execute(conn),
    };
    match ret {
        Ok(_) => (),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            return Err(LedgerError::TeamNameTaken);
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Registration {
        description,
        team_name: team
            .as_ref()
            .map(|(t, _)| t.clone())
            .or(registration.team_name.clone()),
        name: team
            .map(|(_, name)| name)
            .unwrap_or(registration.name.clone()),
        ..registration
    })
}
