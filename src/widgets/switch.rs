use hypertext::prelude::*;

/// A single on/off setting, rendered as a one-button form which posts to
/// `action` and flips the value server-side.
pub struct Switch<'r> {
    pub action: &'r str,
    pub label: &'r str,
    pub on: bool,
}

impl Renderable for Switch<'_> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud! {
            form method="post" action=(self.action) class="d-inline" {
                button type="submit"
                    class=(if self.on { "btn btn-sm btn-success" } else { "btn btn-sm btn-outline-secondary" })
                    aria-pressed=(if self.on { "true" } else { "false" }) {
                    (self.label) ": " (if self.on { "on" } else { "off" })
                }
            }
        }
        .render_to(buffer);
    }
}
