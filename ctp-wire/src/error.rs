//! Error types for encoding/decoding CTP wire structures.

error_chain! {
    types {
        WireError, WireErrorKind, WireResultExt, WireResult;
    }

    errors {
        /// Header or body did not follow the CTP wire format.
        InvalidMessage(reason: String) {
            description("received an invalid CTP message")
            display("invalid CTP message: {}", reason)
        }
        /// Caller supplied an argument that cannot be encoded as given.
        InvalidArgument(reason: String) {
            description("invalid argument to a CTP wire operation")
            display("invalid argument: {}", reason)
        }
    }
}
