// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Binary image frames and their pairing with `OutputsUpdated` metadata.
//!
//! Frame layout:
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────────┐
//! │ length (4 B) │ image id (4 B LE)│ payload …     │
//! └──────────────┴──────────────────┴───────────────┘
//! ```
//!
//! The length field is not checked against the payload size. The payload
//! is an opaque blob; nothing here decodes images.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::subscription::Cycler;

/// Size of the frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Maximum number of unpaired blobs, and separately of unpaired metadata
/// messages, held by an [`ImageCorrelator`].
pub const MAX_PENDING_IMAGES: usize = 16;

/// A decoded binary frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    /// Correlation id shared with the metadata message.
    pub image_id: u32,
    /// The opaque image blob.
    pub payload: Bytes,
}

impl ImageFrame {
    /// Decodes a binary frame without copying its payload.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError::FrameTooShort` if the frame is shorter than
    /// its header.
    pub fn decode(frame: &Bytes) -> Result<Self, ProtocolError> {
        if frame.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::FrameTooShort(frame.len()));
        }
        let image_id = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        Ok(Self {
            image_id,
            payload: frame.slice(FRAME_HEADER_LEN..),
        })
    }
}

/// Pairs image blobs with the cycler named by their metadata message.
///
/// Whichever half of a pair arrives first is buffered until the other one
/// shows up. An id is held by at most one of the two buffers at a time.
///
/// A half whose counterpart never arrives stays buffered until the link
/// disconnects, which calls [`clear`](Self::clear). Each buffer is capped at
/// [`MAX_PENDING_IMAGES`] entries; inserting past the cap evicts the lowest id.
#[derive(Debug, Default)]
pub struct ImageCorrelator {
    blobs: BTreeMap<u32, Bytes>,
    cyclers: BTreeMap<u32, Cycler>,
}

impl ImageCorrelator {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts a binary frame, returning the completed pair if its metadata
    /// already arrived.
    pub fn on_frame(&mut self, frame: ImageFrame) -> Option<(Cycler, Bytes)> {
        if let Some(cycler) = self.cyclers.remove(&frame.image_id) {
            return Some((cycler, frame.payload));
        }
        self.blobs.insert(frame.image_id, frame.payload);
        evict_oldest(&mut self.blobs);
        None
    }

    /// Accepts the metadata of an image, returning the completed pair if the
    /// blob already arrived.
    pub fn on_metadata(&mut self, image_id: u32, cycler: Cycler) -> Option<(Cycler, Bytes)> {
        if let Some(blob) = self.blobs.remove(&image_id) {
            return Some((cycler, blob));
        }
        self.cyclers.insert(image_id, cycler);
        evict_oldest(&mut self.cyclers);
        None
    }

    /// Returns the number of half pairs waiting for their other half.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.blobs.len() + self.cyclers.len()
    }

    /// Drops every buffered half pair.
    pub fn clear(&mut self) {
        self.blobs.clear();
        self.cyclers.clear();
    }
}

fn evict_oldest<T>(buffer: &mut BTreeMap<u32, T>) {
    while buffer.len() > MAX_PENDING_IMAGES {
        if let Some((image_id, _)) = buffer.pop_first() {
            tracing::debug!(image_id, "Evicting unpaired image half");
        }
    }
}
