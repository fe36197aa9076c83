//! Per-event participant rosters and their downloads.

use std::collections::HashMap;

use axum::extract::{Path, State};
use chrono::Utc;
use hypertext::prelude::*;
use itertools::Itertools;

use crate::{
    admin::{
        AdminAccess,
        export::{
            ExportError, export_filename, participants_csv, participants_pdf,
        },
    },
    events::Event,
    media::{MediaFile, MediaKind, list_for_event},
    registrations::Registration,
    state::Conn,
    storage::Bucket,
    util_resp::{
        Attachment, FailureResponse, StandardResponse, SuccessResponse, success,
    },
};

struct Roster<'a> {
    event: &'a Event,
    participants: &'a [Registration],
    media: &'a HashMap<String, Vec<MediaFile>>,
}

impl Renderable for Roster<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        let with_media = self.event.audio || self.event.video;
        maud! {
            @if self.participants.is_empty() {
                p class="text-muted" { "No participants registered yet." }
            } @else {
                p class="small" { "Total participants: " (self.participants.len()) }
                table class="table table-sm table-striped" {
                    thead {
                        tr {
                            th scope="col" { "Token" }
                            th scope="col" { "Name" }
                            @if self.event.team_event {
                                th scope="col" { "Team" }
                            }
                            th scope="col" { "Email" }
                            th scope="col" { "Description" }
                            @if with_media {
                                th scope="col" { "Media" }
                            }
                        }
                    }
                    tbody {
                        @for p in self.participants {
                            tr {
                                td { "#" (p.token) }
                                td { (p.name) }
                                @if self.event.team_event {
                                    td { (p.team_name.as_deref().unwrap_or("-")) }
                                }
                                td { (p.email) }
                                td { (p.description.as_deref().unwrap_or("-")) }
                                @if with_media {
                                    td {
                                        @for file in self.media.get(&p.student_id).map(Vec::as_slice).unwrap_or(&[]) {
                                            a class="me-2" href=(file.url.as_str()) target="_blank" {
                                                (file.key.kind.label())
                                            }
                                        }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

/// Submissions for the event, keyed by student id, audio before video.
async fn media_by_student(
    bucket: &Bucket,
    event_id: &str,
) -> HashMap<String, Vec<MediaFile>> {
    let files = match list_for_event(bucket.as_ref(), event_id).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!("could not list media for event {event_id}: {e}");
            return HashMap::new();
        }
    };

    let mut by_student = files
        .into_iter()
        .into_group_map_by(|file| file.key.student_id.clone());
    for files in by_student.values_mut() {
        files.sort_by_key(|f| f.key.kind != MediaKind::Audio);
    }
    by_student
}

pub async fn participants_fragment(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
    State(bucket): State<Bucket>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    let participants = Registration::for_event(&event.id, &mut conn)?;
    let media = if event.audio || event.video {
        media_by_student(&bucket, &event.id).await
    } else {
        HashMap::new()
    };

    success(
        Roster {
            event: &event,
            participants: &participants,
            media: &media,
        }
        .render(),
    )
}

fn export_failed(event: &Event, e: ExportError) -> FailureResponse {
    tracing::error!("export of event {} failed: {e}", event.id);
    FailureResponse::ServerError(())
}

#[tracing::instrument(skip(_access, conn))]
pub async fn export_pdf(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    let participants = Registration::for_event(&event.id, &mut conn)?;

    let bytes = participants_pdf(&event, &participants, Utc::now().naive_utc())
        .map_err(|e| export_failed(&event, e))?;

    Ok(SuccessResponse::Attachment(Attachment {
        filename: export_filename(&event.title, "pdf"),
        content_type: "application/pdf",
        bytes,
    }))
}

#[tracing::instrument(skip(_access, conn))]
pub async fn export_csv(
    _access: AdminAccess,
    Path(id): Path<String>,
    mut conn: Conn<true>,
) -> StandardResponse {
    let event = Event::fetch(&id, &mut conn)?;
    let participants = Registration::for_event(&event.id, &mut conn)?;

    let bytes =
        participants_csv(&participants).map_err(|e| export_failed(&event, e))?;

    Ok(SuccessResponse::Attachment(Attachment {
        filename: export_filename(&event.title, "csv"),
        content_type: "text/csv; charset=utf-8",
        bytes,
    }))
}
