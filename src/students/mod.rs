//! Students are identified by email. The first sign-in with a given email
//! creates the record; later sign-ins (under any name) resolve to it.

use chrono::{NaiveDateTime, Utc};
use diesel::{
    prelude::*,
    result::{DatabaseErrorKind, Error as DieselError},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{schema::students, validation::max_chars};

pub mod sign_in;

pub use sign_in::{do_sign_in, sign_in_page};

pub const MAX_NAME_CHARS: usize = 128;
pub const MAX_EMAIL_CHARS: usize = 254;

#[derive(Queryable, Selectable, Serialize, Debug, Clone, PartialEq, Eq)]
#[diesel(table_name = students)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: NaiveDateTime,
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
    #[error("Please enter your name and email.")]
    Missing,
    #[error("{0}")]
    Invalid(String),
    #[error("database error: {0}")]
    Database(#[from] DieselError),
}

impl Student {
    #[tracing::instrument(skip(conn))]
    pub fn fetch(id: &str, conn: &mut SqliteConnection) -> QueryResult<Student> {
        students::table
            .filter(students::id.eq(id))
            .select(Student::as_select())
            .first(conn)
    }

    pub fn by_email(
        email: &str,
        conn: &mut SqliteConnection,
    ) -> QueryResult<Option<Student>> {
        students::table
            .filter(students::email.eq(email))
            .select(Student::as_select())
            .first(conn)
            .optional()
    }
}

/// Finds the student with `email`, creating one called `name` if there is
/// none. Both inputs are trimmed; the email is otherwise matched exactly.
#[tracing::instrument(skip(conn))]
pub fn resolve(
    name: &str,
    email: &str,
    conn: &mut SqliteConnection,
) -> Result<Student, ResolveError> {
    let name = name.trim();
    let email = email.trim();
    if name.is_empty() || email.is_empty() {
        return Err(ResolveError::Missing);
    }
    max_chars("Name", name, MAX_NAME_CHARS).map_err(ResolveError::Invalid)?;
    max_chars("Email", email, MAX_EMAIL_CHARS)
        .map_err(ResolveError::Invalid)?;

    if let Some(student) = Student::by_email(email, conn)? {
        tracing::debug!("resolved existing student {}", student.id);
        return Ok(student);
    }

    let student = Student {
        id: Uuid::now_v7().to_string(),
        name: name.to_string(),
        email: email.to_string(),
        created_at: Utc::now().naive_utc(),
    };

    let inserted = diesel::insert_into(students::table)
        .values((
            students::id.eq(&student.id),
            students::name.eq(&student.name),
            students::email.eq(&student.email),
            students::created_at.eq(student.created_at),
        ))
        .execute(conn);

    match inserted {
        Ok(_) => {
            tracing::info!("created student {}", student.id);
            Ok(student)
        }
        // somebody else signed up with this email in the meantime
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Student::by_email(email, conn)?
                .ok_or(ResolveError::Database(DieselError::NotFound))
        }
        Err(e) => Err(e.into()),
    }
}
