//! Per-mode colour generators.
//!
//! Every generator shares one shape: given the number of LEDs of a channel,
//! the profile's speed, smoothness and colours, it fills a slice of colours
//! for the current frame. Brightness is applied by the engine afterwards.

use std::f32::consts::TAU;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::profile::{RgbMode, RgbProfile};
use crate::rgb::color::{Rgb, sample_palette};

/// Inputs that change from frame to frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameContext {
    /// Wall-clock time since the producer task started.
    pub elapsed: Duration,
    /// Current reading for temperature-mapped modes.
    pub temperature: f32,
}

/// Generator for one channel.
#[derive(Debug)]
pub struct Effect {
    mode: RgbMode,
    speed: f32,
    smoothness: f32,
    start: Rgb,
    end: Rgb,
    stops: Vec<Rgb>,
    min_temp: f32,
    max_temp: f32,
    palette: &'static [(f32, Rgb)],
    counter: f32,
    reverse: bool,
    toggle: bool,
    levels: Vec<f32>,
    warp: (Rgb, Rgb),
    rng: StdRng,
}

impl Effect {
    pub fn new(profile: &RgbProfile, leds: usize, palette: &'static [(f32, Rgb)]) -> Self {
        let start = profile.start.rgb().dimmed(profile.start.brightness);
        let end = profile.end.rgb().dimmed(profile.end.brightness);
        let stops = if profile.gradients.is_empty() {
            vec![start, end]
        } else {
            profile
                .gradients
                .iter()
                .map(|c| c.rgb().dimmed(c.brightness))
                .collect()
        };
        Self {
            mode: profile.mode,
            speed: profile.speed(),
            smoothness: f32::from(profile.smoothness()),
            start,
            end,
            stops,
            min_temp: profile.min_temp,
            max_temp: profile.max_temp,
            palette,
            counter: 0.0,
            reverse: false,
            toggle: false,
            levels: vec![0.0; leds],
            warp: (start, end),
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn mode(&self) -> RgbMode {
        self.mode
    }

    /// Per-frame increment of the stateful generators.
    fn step(&self) -> f32 {
        self.speed / self.smoothness * 0.25
    }

    pub fn render(&mut self, ctx: &FrameContext, out: &mut [Rgb]) {
        let n = out.len();
        if n == 0 {
            return;
        }
        let t = ctx.elapsed.as_secs_f32() * self.speed;
        match self.mode {
            RgbMode::Off => out.fill(Rgb::BLACK),
            RgbMode::Static => out.fill(self.start),
            RgbMode::CpuTemperature | RgbMode::GpuTemperature | RgbMode::LiquidTemperature => {
                let span = self.max_temp - self.min_temp;
                let position = if span > f32::EPSILON {
                    (ctx.temperature - self.min_temp) / span
                } else {
                    0.0
                };
                out.fill(sample_palette(self.palette, position));
            }
            RgbMode::Rainbow => hue_sweep(out, t, 1.0),
            RgbMode::PastelRainbow => hue_sweep(out, t, 0.45),
            RgbMode::Watercolor => {
                for (i, c) in out.iter_mut().enumerate() {
                    let i = i as f32;
                    let hue = t * 12.0 + 90.0 * (i * 0.9 + t * 0.4).sin();
                    let saturation = 0.55 + 0.25 * (t * 0.3 + i).sin();
                    *c = Rgb::from_hsv(hue, saturation, 1.0);
                }
            }
            RgbMode::Gradient => {
                for (i, c) in out.iter_mut().enumerate() {
                    let position = (t * 0.05 + i as f32 / n as f32).fract();
                    *c = cyclic(&self.stops, position);
                }
            }
            RgbMode::ColorPulse => self.color_pulse(out),
            RgbMode::ColorShift => self.color_shift(out),
            RgbMode::ColorWarp => self.color_warp(out),
            RgbMode::Rotator => {
                let head = self.advance(n as f32 * 0.5) as usize % n;
                let width = (n / 4).max(1);
                for (i, c) in out.iter_mut().enumerate() {
                    *c = if (i + n - head) % n < width {
                        self.start
                    } else {
                        self.end
                    };
                }
            }
            RgbMode::Wave => {
                for (i, c) in out.iter_mut().enumerate() {
                    let phase = TAU * i as f32 / n as f32 - t * 2.0;
                    *c = self.end.lerp(self.start, (phase.sin() + 1.0) / 2.0);
                }
            }
            RgbMode::Storm => self.storm(out),
            RgbMode::Flickering => self.flickering(out),
            RgbMode::Circle => {
                let head = self.advance(n as f32 * 0.5) as usize % n;
                for (i, c) in out.iter_mut().enumerate() {
                    *c = if i == head { self.start } else { self.end };
                }
            }
            RgbMode::CircleShift => {
                let before = self.counter as usize / n;
                let head = self.advance(n as f32 * 0.5) as usize;
                if head / n != before {
                    self.toggle = !self.toggle;
                }
                let color = if self.toggle { self.end } else { self.start };
                for (i, c) in out.iter_mut().enumerate() {
                    *c = if i == head % n { color } else { Rgb::BLACK };
                }
            }
            RgbMode::Spinner => {
                let head = self.advance(n as f32 * 0.5) as usize % n;
                let tail = (n / 3).max(1);
                for (i, c) in out.iter_mut().enumerate() {
                    let behind = (head + n - i) % n;
                    *c = if behind <= tail {
                        self.start.dimmed(1.0 - behind as f32 / (tail + 1) as f32)
                    } else {
                        Rgb::BLACK
                    };
                }
            }
        }
    }

    /// Moves the counter by `scale` steps and returns the new value.
    fn advance(&mut self, scale: f32) -> f32 {
        self.counter += self.step() * scale;
        self.counter
    }

    fn color_pulse(&mut self, out: &mut [Rgb]) {
        let step = self.step();
        if self.reverse {
            self.counter -= step;
            if self.counter <= 0.0 {
                self.counter = 0.0;
                self.reverse = false;
                self.toggle = !self.toggle;
            }
        } else {
            self.counter += step;
            if self.counter >= 1.0 {
                self.counter = 1.0;
                self.reverse = true;
            }
        }
        let base = if self.toggle { self.end } else { self.start };
        out.fill(base.dimmed(self.counter));
    }

    fn color_shift(&mut self, out: &mut [Rgb]) {
        let step = self.step();
        self.counter = if self.reverse {
            self.counter - step
        } else {
            self.counter + step
        };
        if self.counter >= 1.0 {
            self.counter = 1.0;
            self.reverse = true;
        } else if self.counter <= 0.0 {
            self.counter = 0.0;
            self.reverse = false;
        }
        out.fill(self.start.lerp(self.end, self.counter));
    }

    fn color_warp(&mut self, out: &mut [Rgb]) {
        self.counter += self.step();
        if self.counter >= 1.0 {
            self.counter = 0.0;
            let next = Rgb::new(self.rng.random(), self.rng.random(), self.rng.random());
            self.warp = (self.warp.1, next);
        }
        out.fill(self.warp.0.lerp(self.warp.1, self.counter));
    }

    fn storm(&mut self, out: &mut [Rgb]) {
        let strike = (0.01 * self.speed).clamp(0.001, 0.2) as f64;
        let decay = 1.0 - self.step();
        for (level, c) in self.levels.iter_mut().zip(out.iter_mut()) {
            if self.rng.random_bool(strike) {
                *level = 1.0;
            } else {
                *level *= decay;
            }
            *c = self.end.lerp(self.start, *level);
        }
    }

    fn flickering(&mut self, out: &mut [Rgb]) {
        let change = (0.05 * self.speed).clamp(0.01, 0.5) as f64;
        for (level, c) in self.levels.iter_mut().zip(out.iter_mut()) {
            if *level == 0.0 || self.rng.random_bool(change) {
                *level = self.rng.random_range(0.2..=1.0);
            }
            *c = self.start.dimmed(*level);
        }
    }
}

fn hue_sweep(out: &mut [Rgb], t: f32, saturation: f32) {
    let n = out.len() as f32;
    for (i, c) in out.iter_mut().enumerate() {
        *c = Rgb::from_hsv(t * 36.0 + i as f32 * 360.0 / n, saturation, 1.0);
    }
}

/// Samples an ordered list of stops that wraps from the last back to the first.
fn cyclic(stops: &[Rgb], position: f32) -> Rgb {
    match stops {
        [] => Rgb::BLACK,
        [only] => *only,
        _ => {
            let scaled = position.clamp(0.0, 1.0) * stops.len() as f32;
            let index = (scaled as usize).min(stops.len() - 1);
            let next = (index + 1) % stops.len();
            stops[index].lerp(stops[next], scaled - index as f32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DEFAULT_PALETTE;
    use pretty_assertions::assert_eq;

    fn ctx(ms: u64, temperature: f32) -> FrameContext {
        FrameContext {
            elapsed: Duration::from_millis(ms),
            temperature,
        }
    }

    fn effect(mode: RgbMode, leds: usize) -> Effect {
        let profile = RgbProfile::new(mode, Rgb::new(255, 0, 0), Rgb::new(0, 0, 255));
        Effect::new(&profile, leds, DEFAULT_PALETTE)
    }

    #[test]
    fn static_and_off_fill_every_led() {
        let mut out = vec![Rgb::new(1, 1, 1); 4];
        effect(RgbMode::Static, 4).render(&ctx(0, 0.0), &mut out);
        assert_eq!(out, vec![Rgb::new(255, 0, 0); 4]);
        effect(RgbMode::Off, 4).render(&ctx(0, 0.0), &mut out);
        assert_eq!(out, vec![Rgb::BLACK; 4]);
    }

    #[test]
    fn temperature_mode_maps_through_palette() {
        let mut out = vec![Rgb::BLACK; 2];
        let mut e = effect(RgbMode::CpuTemperature, 2);
        e.render(&ctx(0, 20.0), &mut out);
        assert_eq!(out[0], Rgb::new(0, 0, 255));
        e.render(&ctx(0, 95.0), &mut out);
        assert_eq!(out[1], Rgb::new(255, 0, 0));
    }

    #[test]
    fn rainbow_moves_with_time() {
        let mut a = vec![Rgb::BLACK; 8];
        let mut b = vec![Rgb::BLACK; 8];
        let mut e = effect(RgbMode::Rainbow, 8);
        e.render(&ctx(0, 0.0), &mut a);
        e.render(&ctx(500, 0.0), &mut b);
        assert_eq!(a[0], Rgb::new(255, 0, 0));
        assert_ne!(a, b);
    }

    #[test]
    fn pulse_reverses_and_swaps_colour() {
        let mut e = effect(RgbMode::ColorPulse, 1);
        let mut out = [Rgb::BLACK];
        let mut saw_end = false;
        for _ in 0..200 {
            e.render(&ctx(0, 0.0), &mut out);
            if out[0].b > 0 {
                saw_end = true;
                assert_eq!(out[0].r, 0);
            }
        }
        assert!(saw_end);
    }

    #[test]
    fn circle_lights_exactly_one_led() {
        let mut e = effect(RgbMode::Circle, 6);
        let mut out = vec![Rgb::BLACK; 6];
        for _ in 0..10 {
            e.render(&ctx(0, 0.0), &mut out);
            assert_eq!(out.iter().filter(|c| **c == Rgb::new(255, 0, 0)).count(), 1);
        }
    }

    #[test]
    fn gradient_stops_wrap_around() {
        let stops = [Rgb::new(0, 0, 0), Rgb::new(200, 0, 0)];
        assert_eq!(cyclic(&stops, 0.0), Rgb::new(0, 0, 0));
        assert_eq!(cyclic(&stops, 0.25), Rgb::new(100, 0, 0));
        assert_eq!(cyclic(&stops, 0.75), Rgb::new(100, 0, 0));
    }

    #[test]
    fn every_mode_renders_without_panicking() {
        for mode in RgbMode::ALL {
            let mut e = effect(mode, 5);
            let mut out = vec![Rgb::BLACK; 5];
            for frame in 0..50 {
                e.render(&ctx(frame * 40, 55.0), &mut out);
            }
            e.render(&ctx(0, 0.0), &mut []);
        }
    }
}
