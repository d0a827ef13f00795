//! Rotating braille globe with live visitor markers.

use super::VizState;
use crate::points::AggregatedPoint;
use crate::poller::Poller;
use crate::settings::Settings;
use crate::sync::VisitorSync;
use crate::terminal::{InputEvent, Terminal};
use chrono::Local;
use crossterm::event::KeyCode;
use crossterm::style::Color;
use rand::prelude::*;
use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, PI, TAU};
use std::io;
use std::time::Duration;

/// Coastline outlines in degrees (lat, lon), each closed on its first point.
const CONTINENTS: &[&[(f32, f32)]] = &[
    // North America
    &[
        (69.5, -90.5), (67.1, -81.4), (58.9, -94.7), (51.2, -79.9),
        (62.6, -77.4), (58.2, -67.6), (60.3, -64.6), (53.3, -55.8),
        (46.8, -71.1), (49.2, -65.1), (45.9, -59.8), (39.2, -76.3),
        (31.4, -81.3), (25.2, -80.4), (30.1, -84.1), (27.8, -97.1),
        (18.8, -95.9), (21.5, -87.1), (15.9, -88.9), (15.3, -83.4),
        (9.0, -82.2), (11.1, -74.9), (7.2, -80.9), (19.3, -105.0),
        (31.2, -113.1), (23.4, -109.4), (24.7, -112.2), (40.3, -124.4),
        (49.0, -122.8), (58.1, -134.1), (61.3, -150.6), (54.4, -164.8),
        (58.9, -157.0), (61.5, -166.1), (64.8, -160.8), (65.7, -168.1),
        (71.4, -156.6), (67.4, -108.9), (67.3, -96.1), (71.9, -95.2),
        (69.5, -90.5),
    ],
    // South America
    &[
        (11.1, -74.9), (10.7, -61.9), (4.2, -51.3), (-0.1, -50.4),
        (-7.3, -34.7), (-21.9, -40.9), (-24.9, -47.6), (-34.4, -53.8),
        (-33.9, -58.4), (-36.9, -56.8), (-41.1, -65.1), (-48.1, -66.0),
        (-53.8, -71.0), (-52.3, -74.9), (-46.6, -75.6), (-42.4, -72.7),
        (-18.3, -70.4), (-14.6, -76.0), (-4.7, -81.4), (3.8, -77.1),
        (9.0, -79.1), (11.1, -74.9),
    ],
    // Europe
    &[
        (31.2, 29.7), (31.2, 34.3), (36.7, 36.2), (36.7, 27.6),
        (39.5, 26.2), (41.5, 41.6), (45.2, 36.7), (47.3, 39.1),
        (44.4, 33.9), (46.6, 30.7), (41.1, 28.8), (40.3, 22.6),
        (36.4, 23.2), (45.6, 13.9), (40.2, 18.5), (37.9, 15.7),
        (44.4, 8.9), (36.0, -5.9), (36.9, -8.9), (43.0, -9.4),
        (43.4, -1.9), (48.7, -4.6), (53.5, 8.1), (57.1, 8.5),
        (54.0, 10.9), (54.4, 19.7), (59.2, 23.3), (60.0, 29.1),
        (60.7, 21.3), (65.1, 25.4), (65.7, 22.2), (55.4, 12.9),
        (59.5, 10.4), (58.6, 5.7), (62.6, 5.9), (69.8, 19.2),
        (70.5, 31.3), (69.3, 33.8), (31.2, 29.7),
    ],
    // Africa
    &[
        (29.9, 32.4), (11.7, 42.7), (10.6, 51.0), (-4.7, 39.2),
        (-14.7, 40.8), (-19.8, 34.8), (-24.1, 35.5), (-32.8, 28.2),
        (-34.8, 19.6), (-18.1, 11.8), (-10.7, 13.7), (3.7, 9.4),
        (6.3, 4.3), (4.4, -8.0), (14.7, -17.6), (29.9, 32.4),
    ],
    // Asia
    &[
        (77.0, 107.0), (70.8, 131.3), (69.4, 178.6), (62.3, 179.2),
        (59.9, 163.5), (51.0, 156.8), (56.8, 155.9), (62.6, 164.5),
        (54.7, 135.1), (52.2, 141.4), (39.8, 127.5), (35.1, 129.1),
        (40.9, 121.6), (39.2, 118.0), (37.5, 122.4), (34.9, 119.2),
        (28.2, 121.7), (19.8, 105.9), (13.4, 109.3), (8.6, 105.2),
        (13.4, 100.1), (1.3, 104.2), (22.8, 91.4), (15.9, 80.3),
        (8.0, 77.5), (21.4, 72.6), (30.3, 48.9), (24.0, 51.8),
        (26.4, 56.4), (22.3, 59.8), (12.6, 43.5), (21.3, 39.1),
        (69.3, 33.8), (67.5, 41.1), (66.6, 33.2), (63.8, 37.0),
        (68.6, 43.5), (68.1, 68.5), (71.0, 66.7), (73.0, 69.9),
        (66.2, 72.4), (72.8, 74.7), (77.0, 107.0),
    ],
    // Australia
    &[
        (-13.8, 143.6), (-26.1, 153.1), (-37.4, 150.0), (-38.0, 140.6),
        (-34.4, 138.2), (-35.3, 136.8), (-32.9, 137.8), (-34.9, 136.0),
        (-31.5, 131.3), (-34.2, 115.0), (-21.8, 114.1), (-19.7, 120.9),
        (-14.2, 125.7), (-15.0, 129.6), (-11.1, 132.4), (-11.9, 136.5),
        (-15.0, 135.5), (-17.7, 140.2), (-11.0, 142.1), (-13.8, 143.6),
    ],
    // Greenland
    &[
        (83.5, -27.1), (82.7, -20.8), (82.0, -31.4), (81.3, -12.2),
        (80.2, -20.0), (80.1, -17.7), (76.6, -21.7), (74.3, -19.4),
        (70.2, -26.4), (70.1, -22.3), (65.5, -39.8), (60.1, -43.4),
        (63.6, -51.6), (67.2, -54.0), (69.9, -50.9), (69.6, -54.7),
        (70.6, -51.4), (75.5, -58.6), (78.0, -73.3), (81.8, -62.7),
        (83.5, -27.1),
    ],
    // Japan
    &[
        (37.1, 141.0), (33.5, 135.8), (33.9, 131.0), (31.4, 130.2),
        (33.3, 129.4), (38.2, 139.4), (41.2, 140.3), (37.1, 141.0),
    ],
    // UK and Ireland
    &[
        (58.6, -3.0), (51.3, 1.4), (50.0, -5.2), (54.0, -2.9),
        (56.8, -6.1), (58.6, -3.0),
    ],
    // Antarctica
    &[
        (-64.2, -58.6), (-68.0, -65.7), (-73.7, -60.8), (-79.2, -78.0),
        (-83.2, -58.2), (-80.3, -28.5), (-78.1, -35.3), (-70.9, -6.9),
        (-65.8, 54.5), (-72.3, 69.9), (-66.2, 88.0), (-65.3, 135.1),
        (-71.7, 171.2), (-80.9, 159.8), (-84.7, 180.0), (-90.0, 180.0),
        (-90.0, -180.0), (-84.1, -179.1), (-85.0, -143.1), (-76.9, -158.4),
        (-73.9, -74.9), (-64.2, -58.6),
    ],
];

const HELP: &str = "\
VISITOR GLOBE
-----------------
space  Pause rotation
up/dn  Tilt
+/-    Zoom
0      Reset view
r      Refresh now
1-9    Speed
q      Quit";

struct Pulse {
    lat: f32,
    lon: f32,
    age: f32,
    max_age: f32,
}

/// Map the widget's hex palette onto a truecolor escape.
fn hex_color(hex: &str) -> Color {
    let parse = |s: &str| u8::from_str_radix(s, 16).unwrap_or(0xff);
    match hex.as_bytes() {
        [b'#', ..] if hex.len() == 7 => Color::Rgb {
            r: parse(&hex[1..3]),
            g: parse(&hex[3..5]),
            b: parse(&hex[5..7]),
        },
        _ => Color::Blue,
    }
}

fn pulse_key(p: &AggregatedPoint) -> String {
    format!("{},{}", p.lat, p.lng)
}

/// Run the interactive globe until the user quits.
pub fn run(settings: &Settings, interval_secs: u64, time_step: f32, track: bool) -> io::Result<()> {
    let mut sync = VisitorSync::from_settings(settings).tracking(track);
    let mut points = sync.initial_load();
    let mut poller = Poller::start(sync, Duration::from_secs(interval_secs));

    let mut term = Terminal::new(true)?;
    let mut state = VizState::new(time_step, HELP);
    let mut rng = StdRng::from_entropy();

    let mut rotation: f32 = 0.0;
    let mut tilt: f32 = -0.4;
    let mut zoom: f32 = 1.0;

    let mut seen: HashMap<String, u32> = points
        .iter()
        .map(|p| (pulse_key(p), p.visits))
        .collect();
    let mut pulses: Vec<Pulse> = Vec::new();
    let mut last_update = Local::now();

    let (mut width, mut height) = term.size();
    let mut braille_w = width as usize * 2;
    let mut braille_h = height as usize * 4;
    let mut braille: Vec<Vec<u8>> = vec![vec![0; braille_w]; braille_h];

    loop {
        if let Some(event) = term.poll_event()? {
            match event {
                InputEvent::Key(code) => {
                    if state.handle_key(code) {
                        break;
                    }
                    match code {
                        KeyCode::Up | KeyCode::Char('k') => tilt = (tilt + 0.05).min(FRAC_PI_2),
                        KeyCode::Down | KeyCode::Char('j') => tilt = (tilt - 0.05).max(-FRAC_PI_2),
                        KeyCode::Char('+') | KeyCode::Char('=') => zoom = (zoom * 1.2).min(3.0),
                        KeyCode::Char('-') | KeyCode::Char('_') => zoom = (zoom / 1.2).max(0.3),
                        KeyCode::Char('0') => {
                            zoom = 1.0;
                            tilt = -0.4;
                        }
                        KeyCode::Char('r') => poller.request_refresh(),
                        _ => {}
                    }
                }
                InputEvent::Resize(w, h) => {
                    term.resize(w, h);
                    term.clear_screen()?;
                    width = w;
                    height = h;
                    braille_w = w as usize * 2;
                    braille_h = h as usize * 4;
                    braille = vec![vec![0; braille_w]; braille_h];
                }
            }
        }

        if let Some(update) = poller.latest_update() {
            for point in &update {
                let key = pulse_key(point);
                let grown = seen.get(&key).map_or(true, |&prev| point.visits > prev);
                if grown {
                    pulses.push(Pulse {
                        lat: point.lat as f32,
                        lon: point.lng as f32,
                        age: 0.0,
                        max_age: rng.gen_range(1.5..3.0),
                    });
                }
                seen.insert(key, point.visits);
            }
            points = update;
            last_update = Local::now();
        }

        if state.paused {
            term.sleep(0.1);
            continue;
        }

        rotation = (rotation + state.speed * 0.3).rem_euclid(TAU);

        for row in &mut braille {
            for dot in row {
                *dot = 0;
            }
        }

        let w = width as f32;
        let h = height as f32;
        let radius = (h * 1.8).min(w * 0.8) * 0.4 * zoom;
        let (sin_tilt, cos_tilt) = tilt.sin_cos();

        // Orthographic projection onto braille coordinates; None is the far side.
        let project = |lat: f32, lon: f32| -> Option<(i32, i32)> {
            let (sin_lat, cos_lat) = lat.sin_cos();
            let (sin_lon, cos_lon) = (lon + rotation).sin_cos();

            let x = cos_lat * sin_lon;
            let y = cos_lat * cos_lon;
            let z = sin_lat;

            let depth = y * cos_tilt - z * sin_tilt;
            let z2 = y * sin_tilt + z * cos_tilt;

            if depth < -0.1 {
                return None;
            }

            let bx = ((w / 2.0 + x * radius) * 2.0) as i32;
            let by = ((h / 2.0 - z2 * radius * 0.5) * 4.0) as i32;
            Some((bx, by))
        };

        let mut plot = |bx: i32, by: i32, value: u8| {
            if bx >= 0 && bx < braille_w as i32 && by >= 0 && by < braille_h as i32 {
                let dot = &mut braille[by as usize][bx as usize];
                *dot = (*dot).max(value);
            }
        };

        // Graticule every 30 degrees.
        for lat_deg in (-60..=60).step_by(30) {
            let lat = (lat_deg as f32).to_radians();
            for lon_deg in 0..360 {
                let lon = (lon_deg as f32).to_radians() - PI;
                if let Some((bx, by)) = project(lat, lon) {
                    plot(bx, by, 1);
                }
            }
        }
        for lon_deg in (0..360).step_by(30) {
            let lon = (lon_deg as f32).to_radians() - PI;
            for lat_deg in -90..=90 {
                let lat = (lat_deg as f32).to_radians();
                if let Some((bx, by)) = project(lat, lon) {
                    plot(bx, by, 1);
                }
            }
        }

        // Coastlines, interpolated between outline vertices.
        for outline in CONTINENTS {
            for pair in outline.windows(2) {
                let (lat1, lon1) = (pair[0].0.to_radians(), pair[0].1.to_radians());
                let (lat2, lon2) = (pair[1].0.to_radians(), pair[1].1.to_radians());
                for t in 0..20 {
                    let frac = t as f32 / 20.0;
                    let lat = lat1 + (lat2 - lat1) * frac;
                    let lon = lon1 + (lon2 - lon1) * frac;
                    if let Some((bx, by)) = project(lat, lon) {
                        plot(bx, by, 2);
                    }
                }
            }
        }

        // Expanding rings around fresh activity.
        pulses.retain_mut(|pulse| {
            pulse.age += state.speed * 2.0;
            if pulse.age >= pulse.max_age {
                return false;
            }
            let wave = (pulse.age / pulse.max_age * PI).sin();
            let size = (wave * 3.0) as i32;
            if let Some((bx, by)) = project(pulse.lat, pulse.lon) {
                for dy in -size..=size {
                    for dx in -size..=size {
                        if dx.abs() + dy.abs() <= size {
                            plot(bx + dx, by + dy, 3);
                        }
                    }
                }
            }
            true
        });

        // Fold braille dots into characters.
        term.clear();
        for cy in 0..height as usize {
            let by = cy * 4;
            if by + 3 >= braille_h {
                continue;
            }
            for cx in 0..width as usize {
                let bx = cx * 2;
                if bx + 1 >= braille_w {
                    continue;
                }

                let positions = [
                    (by, bx), (by + 1, bx), (by + 2, bx),
                    (by, bx + 1), (by + 1, bx + 1), (by + 2, bx + 1),
                    (by + 3, bx), (by + 3, bx + 1),
                ];

                let mut dots: u8 = 0;
                let mut level: u8 = 0;
                for (i, &(py, px)) in positions.iter().enumerate() {
                    let value = braille[py][px];
                    if value > 0 {
                        dots |= 1u8 << i;
                        level = level.max(value);
                    }
                }

                if dots > 0 {
                    let ch = char::from_u32(0x2800 + dots as u32).unwrap_or(' ');
                    let (color, bold) = match level {
                        1 => (Color::DarkGrey, false),
                        2 => (Color::DarkGreen, false),
                        _ => (Color::Cyan, true),
                    };
                    term.set(cx as i32, cy as i32, ch, Some(color), bold);
                }
            }
        }

        // Visitor markers sit on top of the braille layer.
        for point in &points {
            let lat = (point.lat as f32).to_radians();
            let lon = (point.lng as f32).to_radians();
            if let Some((bx, by)) = project(lat, lon) {
                let cx = bx / 2;
                let cy = by / 4;
                let color = hex_color(&point.color);
                term.set(cx, cy, '\u{25cf}', Some(color), point.visits > 5);
            }
        }

        let status = format!(
            " {} locations \u{00b7} {} \u{00b7} updated {} ",
            points.len(),
            if poller.is_connected() { "LIVE" } else { "OFFLINE" },
            last_update.format("%H:%M:%S"),
        );
        let status_color = if poller.is_connected() {
            Color::Green
        } else {
            Color::Red
        };
        term.set_str(1, height as i32 - 1, &status, Some(status_color), false);

        state.render_help(&mut term, width, height);
        term.present()?;
        term.sleep(state.speed);
    }

    poller.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::points::{AggregatedPoint, COLOR_HOT};

    #[test]
    fn hex_palette_maps_to_truecolor() {
        assert_eq!(
            hex_color(COLOR_HOT),
            Color::Rgb { r: 0x3b, g: 0x82, b: 0xf6 }
        );
        assert_eq!(hex_color("nonsense"), Color::Blue);
        assert_eq!(hex_color("#zzzzzz"), Color::Rgb { r: 255, g: 255, b: 255 });
    }

    #[test]
    fn continents_are_closed_outlines() {
        for outline in CONTINENTS {
            assert!(outline.len() >= 4);
            assert_eq!(outline.first(), outline.last());
        }
    }

    #[test]
    fn pulse_keys_distinguish_coordinates() {
        let mut a = AggregatedPoint {
            lat: 35.7796,
            lng: -78.6382,
            city: "Raleigh".into(),
            country: "United States".into(),
            visits: 2,
            size: 0.5,
            color: COLOR_HOT.into(),
        };
        let key = pulse_key(&a);
        a.lng = -78.6383;
        assert_ne!(key, pulse_key(&a));
    }
}
