use std::fmt;

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ErrorType{
	CaptureSourceClosed,
	MalformedLandmarks,
	CalibrationDegenerate,
	DegenerateFace,
	ServerBusy,
	InvalidToken,
	NotInitialized,
	InvalidRequest,
	ClientTimeout,
}

impl ErrorType {
	pub fn name(&self) -> &'static str {
		use ErrorType::*;
		match self {
			CaptureSourceClosed => "capture_source_closed",
			MalformedLandmarks => "malformed_landmarks",
			CalibrationDegenerate => "calibration_degenerate",
			DegenerateFace => "degenerate_face",
			ServerBusy => "server_busy",
			InvalidToken => "invalid_token",
			NotInitialized => "not_initialized",
			InvalidRequest => "invalid_request",
			ClientTimeout => "client_timeout",
		}
	}

	// code doubles as the process exit code of `echo front`
	// and as exitCode in status replies. 0 is success and
	// 1 is anything we couldn't classify.
	pub fn code(&self) -> u8 {
		use ErrorType::*;
		match self {
			CaptureSourceClosed => 2,
			CalibrationDegenerate => 3,
			ServerBusy => 4,
			InvalidToken => 5,
			NotInitialized => 6,
			MalformedLandmarks => 7,
			DegenerateFace => 8,
			InvalidRequest => 9,
			ClientTimeout => 10,
		}
	}
}

pub struct Error{
	pub error_type: ErrorType,
}

impl Error {
	pub fn new(error_type: ErrorType) -> Box<dyn std::error::Error> {
		Box::new(Self{error_type: error_type})
	}

	fn format(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.error_type.name())
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.format(f)
	}
}

impl fmt::Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.format(f)
	}
}

impl std::error::Error for Error{}

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// kind_of recovers the ErrorType from a boxed error, if
// the error came from us rather than io / serde.
pub fn kind_of(e: &Box<dyn std::error::Error>) -> Option<ErrorType> {
	e.downcast_ref::<Error>().map(|e| e.error_type)
}

// code_of maps any error onto a status / exit code.
pub fn code_of(e: &Box<dyn std::error::Error>) -> u8 {
	kind_of(e).map(|t| t.code()).unwrap_or(1)
}
