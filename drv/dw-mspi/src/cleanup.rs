// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use drv_mspi_api::MspiError;

/// Outcome of a chain of steps that must all run, reporting the earliest
/// failure.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[must_use]
pub(crate) struct FirstError(Option<MspiError>);

impl FirstError {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn record(&mut self, step: Result<(), MspiError>) {
        if let (None, Err(e)) = (self.0, step) {
            self.0 = Some(e);
        }
    }

    pub fn into_result(self) -> Result<(), MspiError> {
        match self.0 {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

impl From<Result<(), MspiError>> for FirstError {
    fn from(r: Result<(), MspiError>) -> Self {
        let mut f = Self::new();
        f.record(r);
        f
    }
}
