// We follow the same approach as the rest of this family of crates: the
// internal crate reports `&'static str` errors while the public crate defines
// a single opaque Error type that wraps a private ErrorKind.
//
// Every failure in this crate is either validated away before expensive work
// starts or is fatal. There is no recoverable-retry path, so callers mostly
// just need a good message. We still keep distinct kinds so that tests (and
// the occasional caller) can tell a configuration problem apart from a
// problem with the input data.

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
}

/// The underlying internal error type
#[non_exhaustive]
#[derive(Clone, Debug)]
enum ErrorKind {
    /// An error that occurs when a configuration value is invalid
    ConfigValue(ConfigValueError),
    /// An error that occurs when a configuration can't be parsed
    ConfigParse(ConfigParseError),
    /// An error that occurs when 2 inputs were produced with different sky
    /// pixelizations
    PixelizationMismatch(PixelizationMismatchError),
    /// An error that occurs when a sky position can't be assigned a pixel
    UndefinedPixel(UndefinedPixelError),
    /// An error that occurs when the arrays of a spectrum are inconsistent
    SpectrumShape(SpectrumShapeError),
    /// An error that occurs when the arrays of a correlation product are
    /// inconsistent
    ProductShape(ProductShapeError),
    /// An error that occurs when an unknown absorber name is specified
    AbsorberName(AbsorberNameError),
    /// An error that occurs while setting up the worker pool
    WorkerPool(WorkerPoolError),
    /// An error that occurs within `forestpair_internal`
    ///
    /// This wraps the stringly errors that are returned by the internal crate.
    InternalLegacyAdHoc(InternalLegacyAdHocError),
}

// define constructor methods for Error
impl Error {
    /// produce an error indicating that a configuration value is invalid
    pub(crate) fn config_value(name: &'static str, what: String) -> Self {
        Error {
            kind: ErrorKind::ConfigValue(ConfigValueError { name, what }),
        }
    }

    /// produce an error indicating that a configuration couldn't be parsed
    pub(crate) fn config_parse(what: String) -> Self {
        Error {
            kind: ErrorKind::ConfigParse(ConfigParseError(what)),
        }
    }

    /// produce an error indicating that 2 inputs use different pixelizations
    pub(crate) fn pixelization_mismatch(what: &'static str, first: String, second: String) -> Self {
        Error {
            kind: ErrorKind::PixelizationMismatch(PixelizationMismatchError {
                what,
                first,
                second,
            }),
        }
    }

    /// produce an error indicating that a position couldn't be assigned a
    /// pixel
    pub(crate) fn undefined_pixel(theta: f64, phi: f64) -> Self {
        Error {
            kind: ErrorKind::UndefinedPixel(UndefinedPixelError { theta, phi }),
        }
    }

    /// produce an error indicating that a spectrum has inconsistent arrays
    pub(crate) fn spectrum_shape(id: i64, what: &'static str) -> Self {
        Error {
            kind: ErrorKind::SpectrumShape(SpectrumShapeError { id, what }),
        }
    }

    /// produce an error indicating that a correlation product has
    /// inconsistent arrays
    pub(crate) fn product_shape(what: String) -> Self {
        Error {
            kind: ErrorKind::ProductShape(ProductShapeError(what)),
        }
    }

    /// produce an error indicating that an unknown absorber was specified
    pub(crate) fn absorber_name(actual: String, choices: Vec<String>) -> Self {
        Error {
            kind: ErrorKind::AbsorberName(AbsorberNameError { actual, choices }),
        }
    }

    /// produce an error indicating that the worker pool couldn't be built
    pub(crate) fn worker_pool(what: String) -> Self {
        Error {
            kind: ErrorKind::WorkerPool(WorkerPoolError(what)),
        }
    }

    /// wraps a legacy internal error string
    pub(crate) fn internal_legacy_adhoc(message: &'static str) -> Self {
        Error {
            kind: ErrorKind::InternalLegacyAdHoc(InternalLegacyAdHocError(message)),
        }
    }

    /// Returns whether the error describes a problem with the configuration
    /// (including mismatched pixelizations between 2 inputs)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::ConfigValue(_)
                | ErrorKind::ConfigParse(_)
                | ErrorKind::PixelizationMismatch(_)
                | ErrorKind::AbsorberName(_)
        )
    }

    /// Returns whether the error describes a problem with input data
    pub fn is_input_data(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::UndefinedPixel(_) | ErrorKind::SpectrumShape(_) | ErrorKind::ProductShape(_)
        )
    }
}

impl std::error::Error for Error {}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for ErrorKind {}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match *self {
            ErrorKind::ConfigValue(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::ConfigParse(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::PixelizationMismatch(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::UndefinedPixel(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::SpectrumShape(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::ProductShape(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::AbsorberName(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::WorkerPool(ref err) => core::fmt::Display::fmt(err, f),
            ErrorKind::InternalLegacyAdHoc(ref msg) => core::fmt::Display::fmt(msg, f),
        }
    }
}

/// An error that occurs when a configuration value is invalid
#[derive(Clone, Debug)]
struct ConfigValueError {
    name: &'static str,
    what: String,
}

impl std::error::Error for ConfigValueError {}

impl core::fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let ConfigValueError { name, what } = self;
        write!(f, "invalid value for {name}: {what}")
    }
}

/// An error that occurs when a configuration can't be parsed
#[derive(Clone, Debug)]
struct ConfigParseError(String);

impl std::error::Error for ConfigParseError {}

impl core::fmt::Display for ConfigParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "unable to parse the configuration: {}", self.0)
    }
}

/// An error that occurs when 2 inputs were produced with different sky
/// pixelizations
#[derive(Clone, Debug)]
struct PixelizationMismatchError {
    what: &'static str,
    first: String,
    second: String,
}

impl std::error::Error for PixelizationMismatchError {}

impl core::fmt::Display for PixelizationMismatchError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} are different: {} != {}",
            self.what, self.first, self.second
        )
    }
}

/// An error that occurs when a sky position can't be assigned a pixel
#[derive(Clone, Debug)]
struct UndefinedPixelError {
    theta: f64,
    phi: f64,
}

impl std::error::Error for UndefinedPixelError {}

impl core::fmt::Display for UndefinedPixelError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "no pixel is defined for theta = {}, phi = {}",
            self.theta, self.phi
        )
    }
}

/// An error that occurs when the arrays of a spectrum are inconsistent
#[derive(Clone, Debug)]
struct SpectrumShapeError {
    id: i64,
    what: &'static str,
}

impl std::error::Error for SpectrumShapeError {}

impl core::fmt::Display for SpectrumShapeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "problem with spectrum {}: {}", self.id, self.what)
    }
}

/// An error that occurs when the arrays of a correlation product are
/// inconsistent
#[derive(Clone, Debug)]
struct ProductShapeError(String);

impl std::error::Error for ProductShapeError {}

impl core::fmt::Display for ProductShapeError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "malformed correlation product: {}", self.0)
    }
}

/// An error that occurs when an unknown absorber name is specified
#[derive(Clone, Debug)]
struct AbsorberNameError {
    actual: String,
    choices: Vec<String>,
}

impl std::error::Error for AbsorberNameError {}

impl core::fmt::Display for AbsorberNameError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(
            f,
            "{} is not a known absorber. Choices include: {:?}",
            self.actual, self.choices
        )
    }
}

/// An error that occurs while setting up the worker pool
#[derive(Clone, Debug)]
struct WorkerPoolError(String);

impl std::error::Error for WorkerPoolError {}

impl core::fmt::Display for WorkerPoolError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "unable to build the worker pool: {}", self.0)
    }
}

/// A temporary type that wraps the string errors from
/// `forestpair_internal`.
#[derive(Clone)]
struct InternalLegacyAdHocError(&'static str);

impl std::error::Error for InternalLegacyAdHocError {}

impl core::fmt::Display for InternalLegacyAdHocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl core::fmt::Debug for InternalLegacyAdHocError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Debug::fmt(&self.0, f)
    }
}
