// Protobuf messages as they travel through the broker. Field tags are part of
// the contract and must never be renumbered.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PaymentCompletedProto {
    #[prost(string, tag = "1")]
    pub event_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub order_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub user_id: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub payment_method: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub transaction_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AssemblyCompletedProto {
    #[prost(string, tag = "1")]
    pub event_id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub order_id: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub user_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "4")]
    pub build_time_seconds: u64,
}
