use axum::{extract::Form, response::Redirect};
use hypertext::prelude::*;
use serde::Deserialize;

use crate::{
    state::Conn,
    students::{MAX_EMAIL_CHARS, MAX_NAME_CHARS, ResolveError, resolve},
    template::Page,
    util_resp::{
        FailureResponse, StandardResponse, bad_request, see_other_ok, success,
    },
    widgets::alert::ErrorAlert,
};

struct SignInForm<'a> {
    name: &'a str,
    email: &'a str,
    error: Option<&'a str>,
}

impl Renderable for SignInForm<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            div class="row justify-content-center" {
                div class="col-md-6" {
                    h1 class="mb-4" { "Welcome, freshers!" }
                    @if let Some(error) = self.error {
                        ErrorAlert msg=(error);
                    }
                    form method="post" {
                        div class="mb-3" {
                            label for="name" class="form-label" { "Name" }
                            input type="text" class="form-control" id="name"
                                name="name" value=(self.name)
                                maxlength=(MAX_NAME_CHARS) required;
                        }
                        div class="mb-3" {
                            label for="email" class="form-label" { "Email" }
                            input type="email" class="form-control" id="email"
                                name="email" value=(self.email)
                                maxlength=(MAX_EMAIL_CHARS) required;
                        }
                        button type="submit" class="btn btn-primary" {
                            "Continue"
                        }
                    }
                }
            }
        }
        .render_to(buffer)
    }
}

pub async fn sign_in_page() -> StandardResponse {
    success(
        Page::new()
            .title("Sign in")
            .body(SignInForm {
                name: "",
                email: "",
                error: None,
            })
            .render(),
    )
}

#[derive(Deserialize)]
pub struct SignInDetails {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

pub async fn do_sign_in(
    mut conn: Conn<true>,
    Form(form): Form<SignInDetails>,
) -> StandardResponse {
    match resolve(&form.name, &form.email, &mut conn) {
        Ok(student) => see_other_ok(Redirect::to(&format!(
            "/dashboard/{}/overview",
            student.id
        ))),
        Err(ResolveError::Database(e)) => Err(FailureResponse::from(e)),
        Err(e) => {
            let msg = e.to_string();
            bad_request(
                Page::new()
                    .title("Sign in")
                    .body(SignInForm {
                        name: &form.name,
                        email: &form.email,
                        error: Some(&msg),
                    })
                    .render(),
            )
        }
    }
}
