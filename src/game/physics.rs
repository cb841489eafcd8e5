//! Paddle and ball simulation
//!
//! The engine is inert until both players have signalled readiness; before
//! that the match loop still ticks and broadcasts idle frames.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::util::time::tick_delta;

use super::{Ball, Paddle};

/// Field and gameplay constants
#[derive(Debug, Clone)]
pub struct PhysicsConfig {
    pub field_width: f32,
    pub field_height: f32,
    pub paddle_width: f32,
    pub paddle_height: f32,
    /// Paddle inset from its vertical field edge
    pub paddle_margin: f32,
    /// Paddle travel speed in units per second
    pub paddle_speed: f32,
    pub ball_radius: f32,
    /// Ball speed on serve, units per second
    pub serve_speed: f32,
    /// Ball speed ceiling after repeated paddle hits
    pub max_ball_speed: f32,
    /// Speed multiplier applied on each paddle hit
    pub speedup_on_hit: f32,
    /// Steepest deflection off a paddle edge, radians
    pub max_bounce_angle: f32,
    /// Score that concludes the match
    pub win_score: i32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            field_width: 800.0,
            field_height: 600.0,
            paddle_width: 10.0,
            paddle_height: 100.0,
            paddle_margin: 20.0,
            paddle_speed: 320.0,
            ball_radius: 8.0,
            serve_speed: 260.0,
            max_ball_speed: 640.0,
            speedup_on_hit: 1.05,
            max_bounce_angle: 1.0,
            win_score: 5,
        }
    }
}

/// Up/down key state for one paddle, folded from key-down/key-up events
#[derive(Debug, Clone, Copy, Default)]
pub struct PaddleKeys {
    pub up: bool,
    pub down: bool,
}

/// The physics collaborator consumed by the match loop
pub struct PhysicsEngine {
    config: PhysicsConfig,
    started: bool,
    keys: [PaddleKeys; 2],
    rng: ChaCha8Rng,
}

impl PhysicsEngine {
    /// Seeded so a match replays deterministically from its seed
    pub fn new(config: PhysicsConfig, seed: u64) -> Self {
        Self {
            config,
            started: false,
            keys: [PaddleKeys::default(); 2],
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &PhysicsConfig {
        &self.config
    }

    /// Begin advancing ball and paddle physics; serves toward a random side
    pub fn start(&mut self, ball: &mut Ball) {
        if self.started {
            return;
        }
        self.started = true;
        let toward = usize::from(self.rng.gen_bool(0.5));
        self.serve(ball, toward);
    }

    /// Fold a key event into the paddle's input state. Unknown keys are
    /// ignored rather than rejected; clients send whatever the keyboard gave
    /// them.
    pub fn handle_input(&mut self, side: usize, key: &str, pressed: bool) {
        let Some(keys) = self.keys.get_mut(side) else {
            return;
        };
        match key {
            "w" | "W" | "ArrowUp" => keys.up = pressed,
            "s" | "S" | "ArrowDown" => keys.down = pressed,
            _ => {}
        }
    }

    /// Place the ball at field center moving toward the given side (0 = left)
    pub fn serve(&mut self, ball: &mut Ball, toward: usize) {
        let c = &self.config;
        let angle = self.rng.gen_range(-0.35..0.35f32);
        let dir = if toward == 0 { -1.0 } else { 1.0 };
        ball.x = c.field_width / 2.0;
        ball.y = c.field_height / 2.0;
        ball.vx = dir * c.serve_speed * angle.cos();
        ball.vy = c.serve_speed * angle.sin();
        ball.radius = c.ball_radius;
    }

    /// Advance one tick. Returns the index of the player that scored, if any;
    /// the caller owns score bookkeeping and the re-serve.
    pub fn step(&mut self, paddles: &mut [Paddle; 2], ball: &mut Ball) -> Option<usize> {
        if !self.started {
            return None;
        }
        let dt = tick_delta();
        let c = &self.config;

        for (side, paddle) in paddles.iter_mut().enumerate() {
            let keys = self.keys[side];
            let mut dy = 0.0;
            if keys.up {
                dy -= c.paddle_speed * dt;
            }
            if keys.down {
                dy += c.paddle_speed * dt;
            }
            paddle.y = (paddle.y + dy).clamp(0.0, c.field_height - c.paddle_height);
        }

        ball.x += ball.vx * dt;
        ball.y += ball.vy * dt;

        // Horizontal walls reflect
        if ball.y - ball.radius <= 0.0 {
            ball.y = ball.radius;
            ball.vy = ball.vy.abs();
        } else if ball.y + ball.radius >= c.field_height {
            ball.y = c.field_height - ball.radius;
            ball.vy = -ball.vy.abs();
        }

        // Only the paddle the ball is travelling toward can deflect it
        if ball.vx < 0.0 {
            self.deflect_off_paddle(ball, &paddles[0], 1.0);
        } else {
            self.deflect_off_paddle(ball, &paddles[1], -1.0);
        }

        // A ball past a vertical edge is a point for the opposite player
        if ball.x + ball.radius < 0.0 {
            Some(1)
        } else if ball.x - ball.radius > c.field_width {
            Some(0)
        } else {
            None
        }
    }

    /// Reflect the ball off a paddle it overlaps. The bounce angle depends on
    /// where the ball struck the paddle face, and each hit speeds the ball up
    /// toward the configured ceiling.
    fn deflect_off_paddle(&self, ball: &mut Ball, paddle: &Paddle, out_dir: f32) {
        let c = &self.config;

        let within_x =
            ball.x + ball.radius >= paddle.x && ball.x - ball.radius <= paddle.x + paddle.width;
        let within_y =
            ball.y + ball.radius >= paddle.y && ball.y - ball.radius <= paddle.y + paddle.height;
        if !within_x || !within_y {
            return;
        }

        let offset =
            ((ball.y - (paddle.y + paddle.height / 2.0)) / (paddle.height / 2.0)).clamp(-1.0, 1.0);
        let angle = offset * c.max_bounce_angle;

        let speed = (ball.vx.hypot(ball.vy) * c.speedup_on_hit).min(c.max_ball_speed);
        ball.vx = out_dir * speed * angle.cos();
        ball.vy = speed * angle.sin();

        // Snap out of the paddle so the next tick cannot re-collide
        if out_dir > 0.0 {
            ball.x = paddle.x + paddle.width + ball.radius;
        } else {
            ball.x = paddle.x - ball.radius;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::PlayerId;

    fn paddles(config: &PhysicsConfig) -> [Paddle; 2] {
        let mk = |x: f32, name: &str| Paddle {
            id: PlayerId::resolve(None),
            player_name: name.to_string(),
            x,
            y: (config.field_height - config.paddle_height) / 2.0,
            width: config.paddle_width,
            height: config.paddle_height,
        };
        [
            mk(config.paddle_margin, "left"),
            mk(
                config.field_width - config.paddle_margin - config.paddle_width,
                "right",
            ),
        ]
    }

    fn centered_ball(config: &PhysicsConfig) -> Ball {
        Ball {
            x: config.field_width / 2.0,
            y: config.field_height / 2.0,
            vx: 0.0,
            vy: 0.0,
            radius: config.ball_radius,
        }
    }

    #[test]
    fn inert_until_started() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 1);
        let mut paddles = paddles(&config);
        let mut ball = centered_ball(&config);

        engine.handle_input(0, "ArrowUp", true);
        let before = (paddles[0].y, ball.x, ball.y);
        assert_eq!(engine.step(&mut paddles, &mut ball), None);
        assert_eq!(before, (paddles[0].y, ball.x, ball.y));
    }

    #[test]
    fn paddle_clamped_to_field() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 1);
        let mut paddles = paddles(&config);
        let mut ball = centered_ball(&config);

        engine.start(&mut ball);
        engine.handle_input(0, "w", true);
        for _ in 0..10_000 {
            engine.step(&mut paddles, &mut ball);
        }
        assert_eq!(paddles[0].y, 0.0);

        engine.handle_input(0, "w", false);
        engine.handle_input(0, "s", true);
        for _ in 0..10_000 {
            engine.step(&mut paddles, &mut ball);
        }
        assert_eq!(paddles[0].y, config.field_height - config.paddle_height);
    }

    #[test]
    fn ball_reflects_off_top_wall() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 1);
        let mut paddles = paddles(&config);
        let mut ball = centered_ball(&config);

        engine.start(&mut ball);
        ball.y = config.ball_radius + 1.0;
        ball.vx = 0.0;
        ball.vy = -200.0;

        engine.step(&mut paddles, &mut ball);
        assert!(ball.vy > 0.0);
        assert!(ball.y >= ball.radius);
    }

    #[test]
    fn ball_past_left_edge_scores_for_right_player() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 1);
        let mut paddles = paddles(&config);
        // Drop the paddle out of the ball's path
        paddles[0].y = config.field_height - config.paddle_height;
        let mut ball = centered_ball(&config);

        engine.start(&mut ball);
        ball.x = 1.0;
        ball.y = 10.0;
        ball.vx = -400.0;
        ball.vy = 0.0;

        let mut scorer = None;
        for _ in 0..10 {
            scorer = engine.step(&mut paddles, &mut ball);
            if scorer.is_some() {
                break;
            }
        }
        assert_eq!(scorer, Some(1));
    }

    #[test]
    fn paddle_hit_reflects_and_speeds_up() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 1);
        let mut paddles = paddles(&config);
        let mut ball = centered_ball(&config);

        engine.start(&mut ball);
        // Aim straight at the center of the left paddle
        ball.x = paddles[0].x + paddles[0].width + ball.radius + 1.0;
        ball.y = paddles[0].y + paddles[0].height / 2.0;
        ball.vx = -config.serve_speed;
        ball.vy = 0.0;

        engine.step(&mut paddles, &mut ball);
        assert!(ball.vx > 0.0, "ball should reflect to the right");
        let speed = ball.vx.hypot(ball.vy);
        assert!(speed > config.serve_speed);
        assert!(speed <= config.max_ball_speed);
    }

    #[test]
    fn serve_targets_conceding_side() {
        let config = PhysicsConfig::default();
        let mut engine = PhysicsEngine::new(config.clone(), 7);
        let mut ball = centered_ball(&config);

        engine.serve(&mut ball, 0);
        assert!(ball.vx < 0.0);
        engine.serve(&mut ball, 1);
        assert!(ball.vx > 0.0);
        assert_eq!(ball.x, config.field_width / 2.0);
    }
}
