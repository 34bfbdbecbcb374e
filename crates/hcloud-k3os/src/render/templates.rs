//! Embedded templates.

/// Hetzner recursive resolvers.
pub(super) const RESOLV_CONF: &str = "nameserver 213.133.98.98
nameserver 213.133.99.99
nameserver 213.133.100.100
";

/// IPv4 rules for `iptables-restore`; the private network is trusted.
pub(super) const IPTABLES_V4: &str = r#"*filter
:INPUT DROP [0:0]
:FORWARD DROP [0:0]
:OUTPUT ACCEPT [0:0]
:TCP - [0:0]
:UDP - [0:0]

# Input
-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT
-A INPUT -i lo -j ACCEPT
-A INPUT -m conntrack --ctstate INVALID -j DROP
-A INPUT -p icmp -m icmp --icmp-type 8 -m conntrack --ctstate NEW -j ACCEPT
-A INPUT -p udp -m conntrack --ctstate NEW -j UDP
-A INPUT -p tcp --tcp-flags FIN,SYN,RST,ACK SYN -m conntrack --ctstate NEW -j TCP
-A INPUT -i cni0 -s 10.42.0.0/16 -j ACCEPT
-A INPUT -m limit --limit 5/min -j LOG --log-prefix "iptables-rejected: "
-A INPUT -p udp -j REJECT --reject-with icmp-port-unreachable
-A INPUT -p tcp -j REJECT --reject-with tcp-reset
-A INPUT -j REJECT --reject-with icmp-proto-unreachable

-A TCP -p tcp --dport 22 -j ACCEPT
-A TCP -p tcp -m multiport --dports 80,443 -j ACCEPT
-A TCP -p tcp --dport 6443 -j ACCEPT

# k3s
-A TCP -s {{private_network}} -j ACCEPT
-A UDP -s {{private_network}} -j ACCEPT

COMMIT
"#;

/// IPv6 rules for `ip6tables-restore`.
pub(super) const IPTABLES_V6: &str = r#"*filter
:INPUT DROP [0:0]
:FORWARD DROP [0:0]
:OUTPUT ACCEPT [0:0]
:TCP - [0:0]
:UDP - [0:0]

# Input
-A INPUT -m conntrack --ctstate RELATED,ESTABLISHED -j ACCEPT
-A INPUT -i lo -j ACCEPT
-A INPUT -m conntrack --ctstate INVALID -j DROP
-A INPUT -m rt --rt-type 0 -j DROP
-A INPUT -p icmpv6 -j ACCEPT
-A INPUT -p udp -m conntrack --ctstate NEW -j UDP
-A INPUT -p tcp --tcp-flags FIN,SYN,RST,ACK SYN -m conntrack --ctstate NEW -j TCP
-A INPUT -m limit --limit 5/min -j LOG --log-prefix "iptables-rejected: "
-A INPUT -p udp -j REJECT --reject-with icmp6-port-unreachable
-A INPUT -p tcp -j REJECT --reject-with tcp-reset
-A INPUT -j REJECT

# Output
-A OUTPUT -m rt --rt-type 0 -j DROP

-A TCP -p tcp --dport 22 -j ACCEPT
-A TCP -p tcp -m multiport --dports 80,443 -j ACCEPT
-A TCP -p tcp --dport 6443 -j ACCEPT

COMMIT

*raw
:PREROUTING ACCEPT [0:0]
:OUTPUT ACCEPT [0:0]
-A PREROUTING -p ipv6-icmp -j ACCEPT
-A PREROUTING -m rpfilter -j ACCEPT
-A PREROUTING -j DROP

COMMIT
"#;

pub(super) const HCLOUD_CSI_SECRET: &str = "---
apiVersion: v1
kind: Secret
metadata:
  name: hcloud-csi
  namespace: kube-system
stringData:
  token: {{token}}
";

pub(super) const HCLOUD_CSI_KUSTOMIZATION: &str = "---
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
  - https://raw.githubusercontent.com/hetznercloud/csi-driver/v1.5.1/deploy/kubernetes/hcloud-csi.yml
  - secret.yaml
";

/// Floating IP controller secret and config; `floating_ips` is a JSON array.
pub(super) const HCLOUD_FIP_CONFIG: &str = r#"---
apiVersion: v1
kind: Secret
metadata:
  name: fip-controller-secrets
  namespace: fip-controller
stringData:
  HCLOUD_API_TOKEN: {{token}}

---
apiVersion: v1
kind: ConfigMap
metadata:
  name: fip-controller-config
  namespace: fip-controller
data:
  config.json: |
    {
      "hcloud_floating_ips": {{floating_ips}},
      "lease_name": "hcloud-fip"
    }
"#;

pub(super) const HCLOUD_FIP_KUSTOMIZATION: &str = "---
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
  - https://raw.githubusercontent.com/cbeneke/hcloud-fip-controller/v0.4.0/deploy/rbac.yaml
  - https://raw.githubusercontent.com/cbeneke/hcloud-fip-controller/v0.4.0/deploy/daemonset.yaml
  - config.yaml
";

/// Flux deployment patch; `identity` is the base64 encoded git deploy key.
pub(super) const FLUX_PATCH: &str = "---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: flux
spec:
  template:
    spec:
      containers:
      - name: flux
        args:
        - --manifest-generation=true
        - --memcached-hostname=memcached.flux
        - --memcached-service=
        - --ssh-keygen-dir=/var/fluxd/keygen
        - --git-branch=master
        - --git-user=hcloud-k3os
        - --git-email=hcloud-k3os@localhost
        - --git-url={{git_url}}

---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: flux-helm-operator
spec:
  template:
    spec:
      volumes:
      - name: repositories-yaml
        secret:
          secretName: helm-repositories
      - name: repositories-cache
        emptyDir: {}
      containers:
      - name: flux-helm-operator
        args:
          - --enabled-helm-versions=v3
        volumeMounts:
        - name: repositories-yaml
          mountPath: /var/fluxd/helm/repository
        - name: repositories-cache
          mountPath: /var/fluxd/helm/repository/cache

---
apiVersion: v1
kind: Secret
metadata:
  name: flux-git-deploy
  namespace: flux
type: Opaque
data:
  identity: {{identity}}
";

pub(super) const FLUX_KUSTOMIZATION: &str = "---
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
namespace: flux
resources:
  - github.com/fluxcd/flux//deploy?ref=1.21.0
  - github.com/fluxcd/helm-operator//deploy?ref=1.2.0
patchesStrategicMerge:
  - patch.yaml
";

/// Sealed Secrets controller key; cert and key are base64 encoded PEM.
pub(super) const SEALED_SECRETS_SECRET: &str = "---
apiVersion: v1
kind: Secret
type: kubernetes.io/tls
metadata:
  name: sealed-secrets-key
  namespace: kube-system
  labels:
    sealedsecrets.bitnami.com/sealed-secrets-key: active
data:
  tls.crt: {{tls_cert}}
  tls.key: {{tls_key}}
";

pub(super) const SEALED_SECRETS_KUSTOMIZATION: &str = "---
apiVersion: kustomize.config.k8s.io/v1beta1
kind: Kustomization
resources:
  - https://github.com/bitnami-labs/sealed-secrets/releases/download/v0.12.4/controller.yaml
  - secret.yaml
";
