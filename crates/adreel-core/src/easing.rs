//! Named easing curves. Every curve maps `[0, 1]` onto a curve that starts at
//! 0 and ends at 1; overshooting curves (`back`, `elastic`) leave that range in
//! between.

use std::f64::consts::PI;

pub type EasingFn = fn(f64) -> f64;

const EASINGS: &[(&str, EasingFn)] = &[
    ("linear", linear),
    ("none", linear),
    ("power1.in", quad_in),
    ("power1.out", quad_out),
    ("power1.inOut", quad_in_out),
    ("power2.in", cubic_in),
    ("power2.out", cubic_out),
    ("power2.inOut", cubic_in_out),
    ("power3.in", quart_in),
    ("power3.out", quart_out),
    ("power3.inOut", quart_in_out),
    ("sine.in", sine_in),
    ("sine.out", sine_out),
    ("sine.inOut", sine_in_out),
    ("expo.in", expo_in),
    ("expo.out", expo_out),
    ("expo.inOut", expo_in_out),
    ("circ.in", circ_in),
    ("circ.out", circ_out),
    ("circ.inOut", circ_in_out),
    ("back.in", back_in),
    ("back.out", back_out),
    ("back.inOut", back_in_out),
    ("elastic.out", elastic_out),
    ("bounce.out", bounce_out),
    ("ease-in", quad_in),
    ("ease-out", quad_out),
    ("ease-in-out", quad_in_out),
];

/// Resolves an easing name, falling back to linear for names not in the table.
#[must_use]
pub fn resolve(name: &str) -> EasingFn {
    lookup(name).unwrap_or(linear)
}

#[must_use]
pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

fn lookup(name: &str) -> Option<EasingFn> {
    EASINGS
        .iter()
        .find(|(candidate, _)| *candidate == name)
        .map(|(_, curve)| *curve)
}

/// Applies a named curve to a progress value clamped into `[0, 1]`.
#[must_use]
pub fn apply(name: &str, progress: f64) -> f64 {
    resolve(name)(progress.clamp(0.0, 1.0))
}

fn linear(t: f64) -> f64 {
    t
}

fn quad_in(t: f64) -> f64 {
    t * t
}

fn quad_out(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(2)
}

fn quad_in_out(t: f64) -> f64 {
    if t < 0.5 {
        2.0 * t * t
    } else {
        1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
    }
}

fn cubic_in(t: f64) -> f64 {
    t.powi(3)
}

fn cubic_out(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(3)
}

fn cubic_in_out(t: f64) -> f64 {
    if t < 0.5 {
        4.0 * t.powi(3)
    } else {
        1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
    }
}

fn quart_in(t: f64) -> f64 {
    t.powi(4)
}

fn quart_out(t: f64) -> f64 {
    1.0 - (1.0 - t).powi(4)
}

fn quart_in_out(t: f64) -> f64 {
    if t < 0.5 {
        8.0 * t.powi(4)
    } else {
        1.0 - (-2.0 * t + 2.0).powi(4) / 2.0
    }
}

fn sine_in(t: f64) -> f64 {
    1.0 - (t * PI / 2.0).cos()
}

fn sine_out(t: f64) -> f64 {
    (t * PI / 2.0).sin()
}

fn sine_in_out(t: f64) -> f64 {
    -((PI * t).cos() - 1.0) / 2.0
}

fn expo_in(t: f64) -> f64 {
    if t <= 0.0 {
        0.0
    } else {
        2f64.powf(10.0 * t - 10.0)
    }
}

fn expo_out(t: f64) -> f64 {
    if t >= 1.0 {
        1.0
    } else {
        1.0 - 2f64.powf(-10.0 * t)
    }
}

fn expo_in_out(t: f64) -> f64 {
    if t <= 0.0 {
        0.0
    } else if t >= 1.0 {
        1.0
    } else if t < 0.5 {
        2f64.powf(20.0 * t - 10.0) / 2.0
    } else {
        (2.0 - 2f64.powf(-20.0 * t + 10.0)) / 2.0
    }
}

fn circ_in(t: f64) -> f64 {
    1.0 - (1.0 - t * t).max(0.0).sqrt()
}

fn circ_out(t: f64) -> f64 {
    (1.0 - (t - 1.0).powi(2)).max(0.0).sqrt()
}

fn circ_in_out(t: f64) -> f64 {
    if t < 0.5 {
        (1.0 - (1.0 - (2.0 * t).powi(2)).max(0.0).sqrt()) / 2.0
    } else {
        ((1.0 - (-2.0 * t + 2.0).powi(2)).max(0.0).sqrt() + 1.0) / 2.0
    }
}

const BACK_OVERSHOOT: f64 = 1.701_58;

fn back_in(t: f64) -> f64 {
    let c3 = BACK_OVERSHOOT + 1.0;
    c3 * t.powi(3) - BACK_OVERSHOOT * t * t
}

fn back_out(t: f64) -> f64 {
    let c3 = BACK_OVERSHOOT + 1.0;
    1.0 + c3 * (t - 1.0).powi(3) + BACK_OVERSHOOT * (t - 1.0).powi(2)
}

fn back_in_out(t: f64) -> f64 {
    let c2 = BACK_OVERSHOOT * 1.525;
    if t < 0.5 {
        ((2.0 * t).powi(2) * ((c2 + 1.0) * 2.0 * t - c2)) / 2.0
    } else {
        ((2.0 * t - 2.0).powi(2) * ((c2 + 1.0) * (t * 2.0 - 2.0) + c2) + 2.0) / 2.0
    }
}

fn elastic_out(t: f64) -> f64 {
    if t <= 0.0 {
        0.0
    } else if t >= 1.0 {
        1.0
    } else {
        let c4 = 2.0 * PI / 3.0;
        2f64.powf(-10.0 * t) * ((t * 10.0 - 0.75) * c4).sin() + 1.0
    }
}

fn bounce_out(t: f64) -> f64 {
    const N1: f64 = 7.5625;
    const D1: f64 = 2.75;

    if t < 1.0 / D1 {
        N1 * t * t
    } else if t < 2.0 / D1 {
        let t = t - 1.5 / D1;
        N1 * t * t + 0.75
    } else if t < 2.5 / D1 {
        let t = t - 2.25 / D1;
        N1 * t * t + 0.9375
    } else {
        let t = t - 2.625 / D1;
        N1 * t * t + 0.984_375
    }
}
