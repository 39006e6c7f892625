//! Protobuf types and client for the slice router sidecar
//!
//! The sidecar runs next to each slice router and reports which clients are
//! attached to the router's network service. Only the client side is needed
//! here, so the message types and the unary client are maintained by hand.

pub mod router {
    pub mod v1 {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct ClientConnectionInfoRequest {
            #[prost(string, tag = "1")]
            pub slice_name: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ClientConnectionInfo {
            #[prost(string, tag = "1")]
            pub pod_name: String,
            #[prost(string, tag = "2")]
            pub pod_namespace: String,
            #[prost(string, tag = "3")]
            pub nsm_interface: String,
            #[prost(string, tag = "4")]
            pub nsm_ip: String,
            #[prost(string, tag = "5")]
            pub nsm_peer_ip: String,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct ClientConnectionInfoResponse {
            #[prost(message, repeated, tag = "1")]
            pub connections: Vec<ClientConnectionInfo>,
            #[prost(message, optional, tag = "2")]
            pub collected_at: Option<prost_types::Timestamp>,
        }

        pub mod slice_router_sidecar_service_client {
            use super::*;
            use tonic::codegen::*;

            #[derive(Debug, Clone)]
            pub struct SliceRouterSidecarServiceClient<T> {
                inner: tonic::client::Grpc<T>,
            }

            impl SliceRouterSidecarServiceClient<tonic::transport::Channel> {
                pub fn new(channel: tonic::transport::Channel) -> Self {
                    let inner = tonic::client::Grpc::new(channel);
                    Self { inner }
                }
            }

            impl<T> SliceRouterSidecarServiceClient<T>
            where
                T: tonic::client::GrpcService<tonic::body::BoxBody>,
                T::Error: Into<StdError>,
                T::ResponseBody: Body<Data = Bytes> + Send + 'static,
                <T::ResponseBody as Body>::Error: Into<StdError> + Send,
            {
                pub async fn get_client_connection_info(
                    &mut self,
                    request: impl tonic::IntoRequest<ClientConnectionInfoRequest>,
                ) -> Result<tonic::Response<ClientConnectionInfoResponse>, tonic::Status> {
                    self.inner.ready().await.map_err(|e| {
                        tonic::Status::new(
                            tonic::Code::Unknown,
                            format!("Service was not ready: {}", e.into()),
                        )
                    })?;
                    let codec = tonic::codec::ProstCodec::default();
                    let path = http::uri::PathAndQuery::from_static(
                        "/router.v1.SliceRouterSidecarService/GetClientConnectionInfo",
                    );
                    self.inner.unary(request.into_request(), path, codec).await
                }
            }
        }
    }
}

pub use router::v1::slice_router_sidecar_service_client::SliceRouterSidecarServiceClient;
pub use router::v1::*;
