use crate::game::{CharacterView, ReconcileStats};
use crate::network::ConnectionState;
use macroquad::prelude::*;
use shared::physics::ARENA_HALF_EXTENT;

/// Avatar marker radius in world units
const AVATAR_RADIUS: f32 = 0.6;
/// World units the facing line extends past the marker
const FACING_LENGTH: f32 = 1.5;
/// Height at which the marker is fully lifted off the ground shade
const JUMP_SHADE_HEIGHT: f32 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct HudInfo {
    pub connection: ConnectionState,
    pub stats: ReconcileStats,
    pub player_count: usize,
}

/// Top-down view of the arena: world `x` maps to screen x, world `z` to
/// screen y, height is shown by marker brightness.
pub struct Renderer {
    width: f32,
    height: f32,
    scale: f32,
}

impl Renderer {
    pub fn new(width: f32, height: f32) -> Self {
        let mut renderer = Renderer {
            width,
            height,
            scale: 1.0,
        };
        renderer.resize(width, height);
        renderer
    }

    /// Fits the whole arena into the shorter screen side with a margin.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
        self.scale = (width.min(height) * 0.9) / (ARENA_HALF_EXTENT * 2.0);
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn world_to_screen(&self, x: f32, z: f32) -> (f32, f32) {
        (
            self.width / 2.0 + x * self.scale,
            self.height / 2.0 + z * self.scale,
        )
    }

    pub fn render(&mut self, characters: &[CharacterView], hud: HudInfo) {
        if screen_width() != self.width || screen_height() != self.height {
            self.resize(screen_width(), screen_height());
        }

        clear_background(Color::from_rgba(26, 26, 26, 255));
        self.draw_arena();

        // Remotes underneath the local avatar
        for character in characters.iter().filter(|c| !c.is_local) {
            self.draw_character(character);
        }
        for character in characters.iter().filter(|c| c.is_local) {
            self.draw_character(character);
            self.draw_velocity_vector(character);
        }

        self.draw_hud(hud);
    }

    fn draw_arena(&self) {
        let (x0, y0) = self.world_to_screen(-ARENA_HALF_EXTENT, -ARENA_HALF_EXTENT);
        let side = ARENA_HALF_EXTENT * 2.0 * self.scale;
        draw_rectangle(x0, y0, side, side, Color::from_rgba(68, 68, 68, 255));

        let grid = Color::from_rgba(80, 80, 80, 255);
        let step = 10.0;
        let mut offset = -ARENA_HALF_EXTENT + step;
        while offset < ARENA_HALF_EXTENT {
            let (gx, _) = self.world_to_screen(offset, 0.0);
            let (_, gy) = self.world_to_screen(0.0, offset);
            draw_line(gx, y0, gx, y0 + side, 1.0, grid);
            draw_line(x0, gy, x0 + side, gy, 1.0, grid);
            offset += step;
        }

        draw_rectangle_lines(x0, y0, side, side, 2.0, WHITE);
    }

    fn draw_character(&self, character: &CharacterView) {
        let (cx, cy) = self.world_to_screen(character.position.x, character.position.z);
        let radius = AVATAR_RADIUS * self.scale;

        let base = if character.is_local {
            GREEN
        } else {
            Color::from_rgba(255, 68, 68, 255)
        };
        let lift = (character.position.y / JUMP_SHADE_HEIGHT).clamp(0.0, 1.0);
        let color = Color::new(
            base.r + (1.0 - base.r) * lift * 0.5,
            base.g + (1.0 - base.g) * lift * 0.5,
            base.b + (1.0 - base.b) * lift * 0.5,
            1.0,
        );

        draw_circle(cx, cy, radius, color);
        draw_circle_lines(cx, cy, radius, 2.0, WHITE);

        let yaw = character.yaw.to_radians();
        let reach = (AVATAR_RADIUS + FACING_LENGTH) * self.scale;
        let (fx, fy) = (cx + yaw.cos() as f32 * reach, cy + yaw.sin() as f32 * reach);
        draw_line(cx, cy, fx, fy, 2.0, WHITE);

        self.draw_client_id(character, cx, cy - radius - 4.0);
    }

    fn draw_velocity_vector(&self, character: &CharacterView) {
        let (cx, cy) = self.world_to_screen(character.position.x, character.position.z);
        let vel_scale = 0.3 * self.scale;
        let end_x = cx + character.velocity.x * vel_scale;
        let end_y = cy + character.velocity.z * vel_scale;

        if character.velocity.x.abs() > 0.1 || character.velocity.z.abs() > 0.1 {
            draw_line(cx, cy, end_x, end_y, 2.0, YELLOW);
            self.draw_arrow_head(cx, cy, end_x, end_y);
        }
    }

    fn draw_arrow_head(&self, x0: f32, y0: f32, x1: f32, y1: f32) {
        let dx = x1 - x0;
        let dy = y1 - y0;
        let length = (dx * dx + dy * dy).sqrt();

        if length < 5.0 {
            return;
        }

        let arrow_size = 5.0;
        let (nx, ny) = (dx / length, dy / length);
        let (px, py) = (-ny, nx);
        let base_x = x1 - nx * arrow_size;
        let base_y = y1 - ny * arrow_size;

        draw_line(
            x1,
            y1,
            base_x + px * arrow_size / 2.0,
            base_y + py * arrow_size / 2.0,
            1.0,
            YELLOW,
        );
        draw_line(
            x1,
            y1,
            base_x - px * arrow_size / 2.0,
            base_y - py * arrow_size / 2.0,
            1.0,
            YELLOW,
        );
    }

    fn draw_client_id(&self, character: &CharacterView, x: f32, y: f32) {
        let label = character.client_id.to_string();
        let size = measure_text(&label, None, 14, 1.0);
        draw_text(&label, x - size.width / 2.0, y, 14.0, id_color(character.client_id));
    }

    fn draw_hud(&self, hud: HudInfo) {
        let x = 10.0;
        let mut y = 18.0;
        let line = 16.0;

        let connection_color = match hud.connection {
            ConnectionState::Active { .. } => GREEN,
            ConnectionState::Connected => YELLOW,
            ConnectionState::Disconnected => RED,
        };
        draw_rectangle(x, y - 8.0, 8.0, 8.0, connection_color);
        draw_text(&hud.connection.label(), x + 12.0, y, 14.0, WHITE);
        y += line;

        let stats = hud.stats;
        let lines = [
            format!("players {}", hud.player_count),
            format!("reconciled {}", stats.reconciliations),
            format!("teleports {}", stats.teleports),
            format!("replayed {}", stats.last_replayed),
            format!("correction {:.3}", stats.last_correction),
        ];
        for text in &lines {
            draw_text(text, x, y, 14.0, WHITE);
            y += line;
        }

        let controls = "WASD move  SPACE jump  mouse look";
        draw_text(controls, x, self.height - 10.0, 12.0, GRAY);
    }
}

fn id_color(client_id: u64) -> Color {
    match client_id % 8 {
        0 => WHITE,
        1 => RED,
        2 => GREEN,
        3 => BLUE,
        4 => YELLOW,
        5 => MAGENTA,
        6 => Color::from_rgba(0, 255, 255, 255),
        _ => Color::from_rgba(136, 136, 136, 255),
    }
}
