//! Templating code.
//!
//! This defines the [`Page`] item, which wraps the body of every full page
//! served by this crate.

use hypertext::prelude::*;

/// Which navigation bar to show.
#[derive(Debug, Clone, Default)]
enum Nav {
    #[default]
    None,
    Student(String),
    Admin,
}

pub struct Page<R: Renderable> {
    title: Option<String>,
    body: Option<R>,
    nav: Nav,
}

impl<R: Renderable> Page<R> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn body(mut self, body: R) -> Self {
        self.body = Some(body);
        self
    }

    /// Shows the dashboard navigation for `student_id`.
    pub fn student(mut self, student_id: &str) -> Self {
        self.nav = Nav::Student(student_id.to_string());
        self
    }

    pub fn admin(mut self) -> Self {
        self.nav = Nav::Admin;
        self
    }
}

impl<R: Renderable> Renderable for Page<R> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            html {
                head {
                    title {
                        @if let Some(title) = &self.title {
                            (title) " | "
                        }
                        "Freshers"
                    }
                    script src="https://cdn.jsdelivr.net/npm/htmx.org@2.0.7/dist/htmx.min.js" integrity="sha384-ZBXiYtYQ6hJ2Y0ZNoYuI+Nq5MqWBr+chMrS/RkXpNzQCApHEhOt2aY8EJgqwHLkJ" crossorigin="anonymous" {
                    }
                    link href="https://cdn.jsdelivr.net/npm/bootstrap@5.3.8/dist/css/bootstrap.min.css" rel="stylesheet";
                    meta
                        name="viewport"
                        content="width=device-width, initial-scale=1";
                }
                body class="d-flex flex-column vh-100" {
                    nav class="navbar navbar-expand"
                        style="background-color: #7a3b0c;"
                        data-bs-theme="dark" {
                        div class="container-fluid" {
                            @match &self.nav {
                                Nav::Student(sid) => {
                                    a class="navbar-brand text-white"
                                      href=(format!("/dashboard/{sid}/overview")) {
                                        "Freshers"
                                    }
                                    ul class="navbar-nav" style="display: flex; gap: 1rem;" {
                                        li class="nav-item" {
                                            a class="nav-link text-white" href=(format!("/dashboard/{sid}/overview")) {
                                                "My registrations"
                                            }
                                        }
                                        li class="nav-item" {
                                            a class="nav-link text-white" href=(format!("/dashboard/{sid}/freshers")) {
                                                "Events"
                                            }
                                        }
                                        li class="nav-item" {
                                            a class="nav-link text-white" href="/" {
                                                "Sign out"
                                            }
                                        }
                                    }
                                }
                                Nav::Admin => {
                                    a class="navbar-brand text-white" href="/admin" {
                                        "Freshers admin"
                                    }
                                }
                                Nav::None => {
                                    a class="navbar-brand text-white" href="/" {
                                        "Freshers"
                                    }
                                }
                            }
                        }
                    }
                    div class="flex-grow-1 container py-4" {
                        @if let Some(body) = &self.body {
                            (body)
                        }
                    }
                }
            }
        }.render_to(buffer)
    }
}

impl<R: Renderable> Default for Page<R> {
    fn default() -> Self {
        Self {
            title: Default::default(),
            body: Default::default(),
            nav: Default::default(),
        }
    }
}
