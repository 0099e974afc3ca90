use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::MediaInfo;

/// Output format shared by every stage of a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub description: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate_num: u32,
    pub frame_rate_den: u32,
    pub sample_aspect_num: u32,
    pub sample_aspect_den: u32,
    pub display_aspect_num: u32,
    pub display_aspect_den: u32,
    pub progressive: bool,
    explicit: bool,
}

const FALLBACK_PROFILE: &str = "dv_pal";

#[derive(Debug, Clone, Copy)]
pub struct ProfilePreset {
    pub id: &'static str,
    pub description: &'static str,
    pub size: (u32, u32),
    pub frame_rate: (u32, u32),
    pub sample_aspect: (u32, u32),
    pub display_aspect: (u32, u32),
    pub progressive: bool,
}

const fn preset(id: &'static str, description: &'static str, size: (u32, u32), frame_rate: (u32, u32), sample_aspect: (u32, u32), display_aspect: (u32, u32), progressive: bool) -> ProfilePreset {
    ProfilePreset { id, description, size, frame_rate, sample_aspect, display_aspect, progressive }
}

pub const PROFILE_PRESETS: &[ProfilePreset] = &[
    preset("atsc_1080p_25", "HD 1080p 25 fps", (1920, 1080), (25, 1), (1, 1), (16, 9), true),
    preset("atsc_1080p_2997", "HD 1080p 29.97 fps", (1920, 1080), (30000, 1001), (1, 1), (16, 9), true),
    preset("atsc_720p_50", "HD 720p 50 fps", (1280, 720), (50, 1), (1, 1), (16, 9), true),
    preset("hdv_720_25p", "HDV 720 25p", (1280, 720), (25, 1), (1, 1), (16, 9), true),
    preset("dv_pal", "DV/DVD PAL", (720, 576), (25, 1), (16, 15), (4, 3), false),
    preset("dv_ntsc", "DV/DVD NTSC", (720, 480), (30000, 1001), (8, 9), (4, 3), false),
];

impl Profile {
    /// Preset lookup. Unknown ids fall back to `dv_pal`, which is what the
    /// engine loads when asked for a profile it does not know.
    pub fn named(id: &str) -> Self {
        let preset = PROFILE_PRESETS.iter().find(|p| p.id == id).or_else(|| {
            warn!(profile = id, fallback = FALLBACK_PROFILE, "unknown profile, using fallback");
            PROFILE_PRESETS.iter().find(|p| p.id == FALLBACK_PROFILE)
        });
        match preset {
            Some(p) => Self {
                description: p.description.to_string(),
                width: p.size.0,
                height: p.size.1,
                frame_rate_num: p.frame_rate.0,
                frame_rate_den: p.frame_rate.1,
                sample_aspect_num: p.sample_aspect.0,
                sample_aspect_den: p.sample_aspect.1,
                display_aspect_num: p.display_aspect.0,
                display_aspect_den: p.display_aspect.1,
                progressive: p.progressive,
                explicit: true,
            },
            None => Self::implicit(),
        }
    }

    /// Placeholder whose parameters are taken from the first producer opened
    /// under it.
    pub fn implicit() -> Self {
        let info = MediaInfo::default();
        let mut profile = Self {
            description: "automatic".to_string(),
            width: 0,
            height: 0,
            frame_rate_num: 0,
            frame_rate_den: 1,
            sample_aspect_num: 1,
            sample_aspect_den: 1,
            display_aspect_num: 0,
            display_aspect_den: 1,
            progressive: true,
            explicit: false,
        };
        profile.adopt_media(&info);
        profile.explicit = false;
        profile
    }

    pub fn is_explicit(&self) -> bool { self.explicit }

    pub fn set_explicit(&mut self, explicit: bool) { self.explicit = explicit; }

    pub fn adopt_media(&mut self, info: &MediaInfo) {
        self.width = info.width;
        self.height = info.height;
        self.frame_rate_num = info.frame_rate_num;
        self.frame_rate_den = info.frame_rate_den.max(1);
        self.sample_aspect_num = info.sample_aspect_num.max(1);
        self.sample_aspect_den = info.sample_aspect_den.max(1);
        let (num, den) = reduce(self.width as u64 * self.sample_aspect_num as u64, self.height as u64 * self.sample_aspect_den as u64);
        self.display_aspect_num = num as u32;
        self.display_aspect_den = den as u32;
    }

    pub fn fps(&self) -> f64 {
        if self.frame_rate_den == 0 { return 0.0; }
        self.frame_rate_num as f64 / self.frame_rate_den as f64
    }

    pub fn sar(&self) -> f64 {
        if self.sample_aspect_den == 0 { return 1.0; }
        self.sample_aspect_num as f64 / self.sample_aspect_den as f64
    }

    pub fn dar(&self) -> f64 {
        if self.display_aspect_den == 0 { return 0.0; }
        self.display_aspect_num as f64 / self.display_aspect_den as f64
    }

    /// Scale to `height` lines keeping the display aspect. Width is kept even.
    pub fn resize_to_height(&mut self, height: u32) { self.set_size_from(height, self.dar()); }

    /// Scale to `height` lines with `width = height * sar`, which only keeps
    /// the picture's shape for square frames. Width is kept even.
    pub fn resize_to_height_by_sar(&mut self, height: u32) { self.set_size_from(height, self.sar()); }

    fn set_size_from(&mut self, height: u32, aspect: f64) {
        self.height = height;
        let width = (height as f64 * aspect).round() as u32;
        self.width = width & !1;
    }
}

fn reduce(num: u64, den: u64) -> (u64, u64) {
    if num == 0 || den == 0 { return (num, den.max(1)); }
    let (mut a, mut b) = (num, den);
    while b != 0 { let t = a % b; a = b; b = t; }
    (num / a, den / a)
}
