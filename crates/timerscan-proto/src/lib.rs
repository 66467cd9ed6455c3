pub mod proto {
    /// One row of the result table, keyed by `frame_index`.
    ///
    /// `timestamp_seconds` is `-1` when the timer could not be read from the
    /// frame; `text` is then empty.
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct ResultRecord {
        /// Position of the sampled frame within the full video.
        #[prost(uint64, tag = "1")]
        pub frame_index: u64,
        /// Wall-clock offset of the frame into the video, `hhh:mm:ss`.
        #[prost(string, tag = "2")]
        pub offset: ::prost::alloc::string::String,
        /// Decoded on-screen timer value in seconds.
        #[prost(int64, tag = "3")]
        pub timestamp_seconds: i64,
        /// Normalized `h:mm:ss` timer string.
        #[prost(string, tag = "4")]
        pub text: ::prost::alloc::string::String,
        /// Unparsed recognizer output from the last attempt.
        #[prost(string, tag = "5")]
        pub raw_text: ::prost::alloc::string::String,
    }
}
