use hypertext::prelude::*;

pub struct ErrorAlert<S> {
    pub msg: S,
}

impl<S: ToString> Renderable for ErrorAlert<S> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud!({
            div class="alert alert-danger" role="alert" {
                (self.msg.to_string())
            }
        })
        .render_to(buffer);
    }
}

/// Something went partly wrong, but the action as a whole succeeded.
pub struct WarningAlert<S> {
    pub msg: S,
}

impl<S: ToString> Renderable for WarningAlert<S> {
    fn render_to(
        &self,
        buffer: &mut hypertext::Buffer<hypertext::context::Node>,
    ) {
        maud!({
            div class="alert alert-warning" role="alert" {
                (self.msg.to_string())
            }
        })
        .render_to(buffer);
    }
}
