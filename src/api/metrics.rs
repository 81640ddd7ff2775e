use axum::extract::State;

use crate::app::AppState;

pub(crate) async fn render(State(state): State<AppState>) -> String {
    state.telemetry().render_prometheus()
}
