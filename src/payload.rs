use chrono::{Duration, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    palette::PALETTE,
    protocol::{ClientMessage, PixelUpdate, ServerMessage},
    state::AppState,
};

/// First message on every connection; lets the client configure itself.
pub fn init_message(state: &AppState, client: Uuid) -> ServerMessage {
    ServerMessage::Init {
        identity: client,
        canvas_width: state.canvas.width(),
        canvas_height: state.canvas.height(),
        palette: PALETTE.to_vec(),
        cooldown_ms: state.rate_limiter.cooldown().as_millis() as u64,
    }
}

pub struct WsPayload {
    pub parsed: ClientMessage,
}

impl WsPayload {
    /// Applies one decoded request. Returns the direct reply for the sender,
    /// if any. Rejected draws other than cooldown get no reply.
    pub fn handle_payload(self, state: &AppState, client: Uuid) -> Option<ServerMessage> {
        match self.parsed {
            ClientMessage::RegionQuery {
                x,
                y,
                width,
                height,
            } => {
                let area = width as u64 * height as u64;
                if area > state.max_region_cells {
                    debug!(
                        "Dropping region query of {} cells (limit {})",
                        area, state.max_region_cells
                    );
                    return None;
                }

                trace!("Region query {}x{} at ({}, {})", width, height, x, y);
                let data = state.canvas.region(x, y, width, height);
                Some(ServerMessage::Region {
                    x,
                    y,
                    width,
                    height,
                    data,
                })
            }
            ClientMessage::DrawRequest { x, y, color_index } => {
                draw(state, client, x, y, color_index)
            }
            ClientMessage::Unknown => {
                debug!("Ignoring message of unknown kind");
                None
            }
        }
    }
}

fn draw(state: &AppState, client: Uuid, x: i64, y: i64, color_index: i64) -> Option<ServerMessage> {
    if let Some(remaining) = state.rate_limiter.remaining(&client) {
        debug!("Draw rejected, {:?} of cooldown left", remaining);
        return Some(ServerMessage::Cooldown {
            remaining_ms: remaining.as_millis().max(1) as u64,
        });
    }

    let Ok(color) = u8::try_from(color_index) else {
        debug!("Dropping draw with color index {}", color_index);
        return None;
    };
    if !state.canvas.set(x, y, color) {
        debug!("Dropping invalid draw at ({}, {}) color {}", x, y, color);
        return None;
    }

    state.rate_limiter.record_draw(client);
    // set() accepted the coordinates, so they fit the canvas.
    state.scheduler.enqueue(PixelUpdate {
        x: x as u32,
        y: y as u32,
        color_index: color,
    });

    let cooldown = Duration::milliseconds(state.rate_limiter.cooldown().as_millis() as i64);
    let next_eligible_at = Utc::now() + cooldown;
    debug!("Draw accepted at ({}, {}) color {}", x, y, color);
    Some(ServerMessage::DrawAccepted {
        next_eligible_at: next_eligible_at.timestamp_millis(),
    })
}
