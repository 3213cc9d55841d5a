//! Image slot binding.
//!
//! Two phases, both driven by the template [`Tier`]:
//!
//! 1. [`validate_uploads`] runs once, before any side effect. A required
//!    upload that is absent, missing on disk, or empty fails the whole batch
//!    with `MissingAsset`; a present upload of the wrong kind fails with
//!    `InvalidUpload`.
//! 2. [`ImageBindingResolver::resolve`] runs per candidate. Static slots are
//!    computed once per batch ([`StaticBindings`]); only the photo varies.
//!
//! Slots reach the renderer as parameter names:
//!
//! | Slot | Parameter |
//! |------|-----------|
//! | background | `imgParamBG` |
//! | static image *n* | `imgParam{n}` (1–15) |
//! | candidate photo | `imgParam3` |
//! | logo | `imgParam5` |
//! | signature | `imgParam6` |
//!
//! Named slots are applied after the numbered ones and take their place.

use crate::candidate::CandidateRecord;
use crate::config::Tier;
use crate::error::{CertBatchError, UploadRole};
use crate::pipeline::{assets, input};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const BACKGROUND_PARAM: &str = "imgParamBG";
pub const PHOTO_PARAM: &str = "imgParam3";
pub const LOGO_PARAM: &str = "imgParam5";
pub const SIGNATURE_PARAM: &str = "imgParam6";

/// Highest numbered slot.
pub const MAX_SEQUENTIAL_SLOTS: usize = 15;

pub fn sequential_param(n: usize) -> String {
    format!("imgParam{n}")
}

/// True for every parameter name a layout may bind an image to.
pub fn is_slot_param(name: &str) -> bool {
    if name == BACKGROUND_PARAM {
        return true;
    }
    name.strip_prefix("imgParam")
        .and_then(|n| n.parse::<usize>().ok())
        .map(|n| (1..=MAX_SEQUENTIAL_SLOTS).contains(&n))
        .unwrap_or(false)
}

/// Optional files supplied alongside the spreadsheet.
#[derive(Debug, Clone, Default)]
pub struct Uploads {
    /// Zip archive of candidate photos.
    pub archive: Option<PathBuf>,
    pub logo: Option<PathBuf>,
    pub signature: Option<PathBuf>,
}

impl Uploads {
    pub fn get(&self, role: UploadRole) -> Option<&Path> {
        match role {
            UploadRole::PhotoArchive => self.archive.as_deref(),
            UploadRole::Logo => self.logo.as_deref(),
            UploadRole::Signature => self.signature.as_deref(),
        }
    }
}

/// Uploads checked against a tier. Only uploads the tier uses are kept.
#[derive(Debug, Clone)]
pub struct ValidatedUploads {
    pub tier: Tier,
    pub archive: Option<PathBuf>,
    pub logo: Option<PathBuf>,
    pub signature: Option<PathBuf>,
}

/// Check that every upload `tier` requires is present and well-formed.
pub fn validate_uploads(tier: Tier, uploads: &Uploads) -> Result<ValidatedUploads, CertBatchError> {
    for &role in tier.required_uploads() {
        let path = uploads.get(role);
        if !input::is_present(path) {
            return Err(CertBatchError::MissingAsset { tier, role });
        }
        if let Some(p) = path {
            input::check_upload(role, p)?;
        }
    }

    let keep = |role: UploadRole| {
        tier.required_uploads()
            .contains(&role)
            .then(|| uploads.get(role).map(Path::to_path_buf))
            .flatten()
    };

    debug!("Uploads valid for tier {}", tier);
    Ok(ValidatedUploads {
        tier,
        archive: keep(UploadRole::PhotoArchive),
        logo: keep(UploadRole::Logo),
        signature: keep(UploadRole::Signature),
    })
}

/// Background and numbered slots shared by every candidate of a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticBindings {
    pub background: Option<PathBuf>,
    /// `sequential[0]` is slot 1.
    pub sequential: Vec<PathBuf>,
}

impl StaticBindings {
    /// Template images first, then base images. The first file whose name
    /// contains `bg` (any case) is the background; the rest fill slots
    /// 1..=`max_slots` in order.
    pub fn from_images(template: &[PathBuf], base: &[PathBuf], max_slots: usize) -> Self {
        let max_slots = max_slots.min(MAX_SEQUENTIAL_SLOTS);
        let all: Vec<&PathBuf> = template.iter().chain(base.iter()).collect();

        let bg_index = all.iter().position(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains("bg"))
                .unwrap_or(false)
        });

        let sequential = all
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != bg_index)
            .map(|(_, p)| (*p).clone())
            .take(max_slots)
            .collect();

        Self {
            background: bg_index.map(|i| all[i].clone()),
            sequential,
        }
    }
}

/// Resolved image slots for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageBindingSet {
    pub background: Option<PathBuf>,
    pub sequential: Vec<PathBuf>,
    pub photo: Option<PathBuf>,
    pub logo: Option<PathBuf>,
    pub signature: Option<PathBuf>,
}

impl ImageBindingSet {
    /// Parameter name → image path, named slots overlaying numbered ones.
    pub fn params(&self) -> BTreeMap<String, PathBuf> {
        let mut out = BTreeMap::new();
        if let Some(bg) = &self.background {
            out.insert(BACKGROUND_PARAM.to_string(), bg.clone());
        }
        for (i, p) in self.sequential.iter().enumerate() {
            out.insert(sequential_param(i + 1), p.clone());
        }
        let named = [
            (PHOTO_PARAM, &self.photo),
            (LOGO_PARAM, &self.logo),
            (SIGNATURE_PARAM, &self.signature),
        ];
        for (param, path) in named {
            if let Some(p) = path {
                out.insert(param.to_string(), p.clone());
            }
        }
        out
    }
}

/// Per-batch resolver: static slots plus validated uploads.
#[derive(Debug, Clone)]
pub struct ImageBindingResolver {
    statics: StaticBindings,
    uploads: ValidatedUploads,
    /// Where the photo archive was extracted.
    photo_dir: Option<PathBuf>,
}

impl ImageBindingResolver {
    pub fn new(statics: StaticBindings, uploads: ValidatedUploads, photo_dir: Option<PathBuf>) -> Self {
        Self {
            statics,
            uploads,
            photo_dir,
        }
    }

    pub fn statics(&self) -> &StaticBindings {
        &self.statics
    }

    pub fn resolve(&self, candidate: &CandidateRecord) -> ImageBindingSet {
        let mut set = ImageBindingSet {
            background: self.statics.background.clone(),
            sequential: self.statics.sequential.clone(),
            ..Default::default()
        };

        match self.uploads.tier {
            Tier::NoImages => {}
            Tier::PhotoOnly => {
                set.photo = self.photo_for(candidate);
            }
            Tier::PhotoAndLogo => {
                set.photo = self.photo_for(candidate);
                set.logo = self.uploads.logo.clone();
            }
            Tier::PhotoLogoSignature => {
                set.photo = self.photo_for(candidate);
                set.logo = self.uploads.logo.clone();
                set.signature = self.uploads.signature.clone();
            }
        }
        set
    }

    fn photo_for(&self, candidate: &CandidateRecord) -> Option<PathBuf> {
        let dir = self.photo_dir.as_deref()?;
        let found = assets::find_by_identifier(dir, &candidate.identifier);
        if found.is_none() {
            warn!(
                "No photo found for candidate {}; rendering without one",
                candidate.identifier
            );
        }
        found
    }
}
